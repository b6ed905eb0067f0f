//! Possible values of SSA variables, and the run-wide cache of resolved value sets.

use crate::containers::unordered::UnorderedMap;
use crate::containers::unordered::UnorderedSet;
use crate::il::{RegisterId, RegisterValue, SSAVariable, SSAVariableIdentity};

/// A single value an SSA variable might hold at runtime.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PossibleValue {
    Constant(u64),
    ConstantPointer(u64),
    EntryRegisterValue(RegisterId),
    /// A variable whose value could not be pinned down; stands in for itself.
    UnresolvedSymbolic(SSAVariableIdentity),
    Undetermined,
}

impl PossibleValue {
    /// The address this value refers to. Plain integers are not taken as addresses.
    pub fn as_pointer(&self) -> Option<u64> {
        match self {
            PossibleValue::ConstantPointer(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<RegisterValue> for PossibleValue {
    fn from(v: RegisterValue) -> Self {
        match v {
            RegisterValue::Undetermined => PossibleValue::Undetermined,
            RegisterValue::Constant(c) => PossibleValue::Constant(c),
            RegisterValue::ConstantPointer(c) => PossibleValue::ConstantPointer(c),
            RegisterValue::EntryValue(reg) => PossibleValue::EntryRegisterValue(reg),
        }
    }
}

impl std::fmt::Debug for PossibleValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PossibleValue::Constant(v) => write!(f, "<const {:x}>", v),
            PossibleValue::ConstantPointer(v) => write!(f, "<const ptr {:x}>", v),
            PossibleValue::EntryRegisterValue(reg) => write!(f, "<entry {}>", reg),
            PossibleValue::UnresolvedSymbolic(id) => write!(f, "<symbolic {:?}>", id),
            PossibleValue::Undetermined => write!(f, "<undetermined>"),
        }
    }
}

/// The set of possible values of one variable. Empty means nothing could be determined, which is
/// not the same as a known zero.
pub type ValueSet = UnorderedSet<PossibleValue>;

/// Resolved value sets for every function of the run, keyed by function start address and then by
/// the `name#version` form of the SSA variable.
///
/// Entries are written once per key by resolution (SSA definitions do not change), except for
/// entry-register values, which accumulate over every call site that forwards into the function.
#[derive(Default, Debug)]
pub struct FunctionValueSets {
    sets: UnorderedMap<u64, UnorderedMap<String, ValueSet>>,
}

impl FunctionValueSets {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get(&self, function_start: u64, var: &SSAVariable) -> Option<&ValueSet> {
        self.sets.get(&function_start)?.get(&var.to_string())
    }

    /// Store the result of resolving `var`, replacing any earlier result for it.
    pub fn insert(&mut self, function_start: u64, var: &SSAVariable, values: ValueSet) {
        self.sets
            .entry(function_start)
            .or_default()
            .insert(var.to_string(), values);
    }

    /// The values `reg` may hold on entry to the function at `function_start`, if any call site
    /// forwarded some.
    pub fn get_entry_register(&self, function_start: u64, reg: &str) -> Option<&ValueSet> {
        self.get(function_start, &SSAVariable::entry_of(reg))
    }

    /// Merge `values` into what `reg` may hold on entry to the function at `function_start`.
    pub fn add_entry_register_values(
        &mut self,
        function_start: u64,
        reg: &str,
        values: impl IntoIterator<Item = PossibleValue>,
    ) {
        self.sets
            .entry(function_start)
            .or_default()
            .entry(SSAVariable::entry_of(reg).to_string())
            .or_default()
            .extend(values);
    }

    /// Number of functions with at least one cached set
    pub fn function_count(&self) -> usize {
        self.sets.len()
    }
}
