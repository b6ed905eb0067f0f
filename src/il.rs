//! SSA-form medium-level intermediate language, as handed over by the disassembler host.
//!
//! Each function owns an arena of [`Expr`] nodes. Instructions are the roots of expression
//! trees; operands point at their sub-expressions by [`ExprIndex`]. Nothing here is ever mutated
//! once the host has produced it.

use crate::containers::unordered::UnorderedMap;

/// The name of the pseudo-variable holding the return address of a function. Chasing its
/// definition would unwind through call returns, so it is treated as opaque.
pub const RETURN_ADDRESS_VARIABLE: &str = "__return_addr";

/// A machine register, by name (e.g., `rdi`)
pub type RegisterId = String;

/// An SSA variable within a single function: a base variable with a version number.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SSAVariable {
    pub name: String,
    pub version: usize,
}

impl SSAVariable {
    pub fn new(name: impl Into<String>, version: usize) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// The version-0 variable of `reg`, i.e., the register's value at function entry
    pub fn entry_of(reg: &str) -> Self {
        Self::new(reg, 0)
    }

    pub fn is_return_address(&self) -> bool {
        self.name == RETURN_ADDRESS_VARIABLE
    }

    /// Parse the `name#version` form
    pub fn parse(s: &str) -> Option<Self> {
        let (name, version) = s.rsplit_once('#')?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, version.parse().ok()?))
    }
}

impl std::fmt::Display for SSAVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.version)
    }
}
impl std::fmt::Debug for SSAVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// An SSA variable together with the function it lives in. Uniquely identifies one definition
/// site across the whole binary.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SSAVariableIdentity {
    pub var: SSAVariable,
    pub function_start: u64,
}

impl std::fmt::Debug for SSAVariableIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}@{:#x}", self.var, self.function_start)
    }
}

/// The host's own classification of what an SSA variable may hold. The undetermined/concrete
/// distinction is taken as ground truth whenever the host has one.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum RegisterValue {
    Undetermined,
    Constant(u64),
    ConstantPointer(u64),
    /// Whatever `reg` held when the owning function was entered
    EntryValue(RegisterId),
}

impl RegisterValue {
    pub fn is_undetermined(&self) -> bool {
        matches!(self, RegisterValue::Undetermined)
    }
}

/// An index into a [`Function`]'s expression arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprIndex(pub usize);

impl std::fmt::Debug for ExprIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// The operation performed by an expression node, along with its operands.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ExprKind {
    Const {
        constant: u64,
    },
    ConstPtr {
        constant: u64,
    },
    /// Memory load from the address computed by `src`
    LoadSsa {
        src: ExprIndex,
    },
    Add {
        left: ExprIndex,
        right: ExprIndex,
    },
    /// A read of an SSA variable
    VarSsa {
        src: SSAVariable,
    },
    /// Definition of `dest` from `src`
    SetVarSsa {
        dest: SSAVariable,
        src: ExprIndex,
    },
    /// A read of a variable whose address was taken (e.g., a stack slot passed by reference)
    VarAliased {
        src: SSAVariable,
    },
    SetVarAliased {
        dest: SSAVariable,
        src: ExprIndex,
    },
    /// `dest` is one of `src`, depending on the incoming control flow
    VarPhi {
        dest: SSAVariable,
        src: Vec<SSAVariable>,
    },
    /// Call to `dest` with `params`, defining the variables in `output`
    CallSsa {
        output: Vec<SSAVariable>,
        dest: ExprIndex,
        params: Vec<ExprIndex>,
    },
    /// Any operation without dedicated support. Kept around so that its operands are still
    /// reachable for diagnostics.
    Unsupported {
        operation: String,
        operands: Vec<ExprIndex>,
    },
}

impl ExprKind {
    /// The host's operation name for this node
    pub fn operation_name(&self) -> &str {
        match self {
            ExprKind::Const { .. } => "CONST",
            ExprKind::ConstPtr { .. } => "CONST_PTR",
            ExprKind::LoadSsa { .. } => "LOAD_SSA",
            ExprKind::Add { .. } => "ADD",
            ExprKind::VarSsa { .. } => "VAR_SSA",
            ExprKind::SetVarSsa { .. } => "SET_VAR_SSA",
            ExprKind::VarAliased { .. } => "VAR_ALIASED",
            ExprKind::SetVarAliased { .. } => "SET_VAR_ALIASED",
            ExprKind::VarPhi { .. } => "VAR_PHI",
            ExprKind::CallSsa { .. } => "CALL_SSA",
            ExprKind::Unsupported { operation, .. } => operation,
        }
    }

    /// The direct sub-expressions of this node
    pub fn operands(&self) -> Vec<ExprIndex> {
        match self {
            ExprKind::Const { .. }
            | ExprKind::ConstPtr { .. }
            | ExprKind::VarSsa { .. }
            | ExprKind::VarAliased { .. }
            | ExprKind::VarPhi { .. } => vec![],
            ExprKind::LoadSsa { src }
            | ExprKind::SetVarSsa { src, .. }
            | ExprKind::SetVarAliased { src, .. } => vec![*src],
            ExprKind::Add { left, right } => vec![*left, *right],
            ExprKind::CallSsa { dest, params, .. } => {
                std::iter::once(*dest).chain(params.iter().cloned()).collect()
            }
            ExprKind::Unsupported { operands, .. } => operands.clone(),
        }
    }

    /// The SSA variables defined by this node, if it is an instruction that defines any
    pub fn defined_variables(&self) -> Vec<&SSAVariable> {
        match self {
            ExprKind::SetVarSsa { dest, .. }
            | ExprKind::SetVarAliased { dest, .. }
            | ExprKind::VarPhi { dest, .. } => vec![dest],
            ExprKind::CallSsa { output, .. } => output.iter().collect(),
            _ => vec![],
        }
    }

    /// The constant carried by a `CONST` or `CONST_PTR` node
    pub fn constant(&self) -> Option<u64> {
        match self {
            ExprKind::Const { constant } | ExprKind::ConstPtr { constant } => Some(*constant),
            _ => None,
        }
    }
}

/// An IL expression node.
#[derive(Clone, PartialEq, Eq)]
pub struct Expr {
    /// The address of the machine instruction this node was lifted from
    pub address: u64,
    pub kind: ExprKind,
}

impl std::fmt::Debug for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#x}: {:?}", self.address, self.kind)
    }
}

/// A function in SSA form.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    /// Machine address of the function's entry point
    pub start: u64,
    /// Registers carrying the function's parameters, in argument order
    pub params: Vec<RegisterId>,
    exprs: Vec<Expr>,
    /// Roots of the instruction trees, in IL order
    instructions: Vec<ExprIndex>,
    /// Instruction defining each SSA variable
    definitions: UnorderedMap<SSAVariable, ExprIndex>,
    /// The host's classification for each SSA variable; absence means undetermined.
    possible_values: UnorderedMap<SSAVariable, RegisterValue>,
}

impl Function {
    pub fn new(name: impl Into<String>, start: u64) -> Self {
        Self {
            name: name.into(),
            start,
            params: vec![],
            exprs: vec![],
            instructions: vec![],
            definitions: Default::default(),
            possible_values: Default::default(),
        }
    }

    /// Add a (sub-)expression to the arena, returning its index. Operands must already have been
    /// added.
    pub fn add_expr(&mut self, address: u64, kind: ExprKind) -> ExprIndex {
        debug_assert!(kind.operands().iter().all(|op| op.0 < self.exprs.len()));
        let idx = ExprIndex(self.exprs.len());
        self.exprs.push(Expr { address, kind });
        idx
    }

    /// Add an instruction rooted at `kind`, recording any SSA definitions it makes. A variable
    /// defined twice keeps its first definition (the IR would not be in SSA form otherwise).
    pub fn add_instruction(&mut self, address: u64, kind: ExprKind) -> ExprIndex {
        let idx = self.add_expr(address, kind);
        let defined: Vec<SSAVariable> = self.exprs[idx.0]
            .kind
            .defined_variables()
            .into_iter()
            .cloned()
            .collect();
        for var in defined {
            self.definitions.entry(var).or_insert(idx);
        }
        self.instructions.push(idx);
        idx
    }

    pub fn set_possible_value(&mut self, var: SSAVariable, value: RegisterValue) {
        self.possible_values.insert(var, value);
    }

    pub fn get(&self, idx: ExprIndex) -> Option<&Expr> {
        self.exprs.get(idx.0)
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// The instruction roots, in IL order
    pub fn instructions(&self) -> impl Iterator<Item = (ExprIndex, &Expr)> {
        self.instructions.iter().map(move |&i| (i, &self.exprs[i.0]))
    }

    /// The first instruction lifted from the machine instruction at `address`
    pub fn instruction_at_address(&self, address: u64) -> Option<ExprIndex> {
        self.instructions
            .iter()
            .find(|&&i| self.exprs[i.0].address == address)
            .cloned()
    }

    /// The instruction defining `var`; `None` for variables without an explicit definition, such
    /// as a register's value at entry.
    pub fn get_ssa_var_definition(&self, var: &SSAVariable) -> Option<ExprIndex> {
        self.definitions.get(var).cloned()
    }

    pub fn get_ssa_var_possible_values(&self, var: &SSAVariable) -> RegisterValue {
        self.possible_values
            .get(var)
            .cloned()
            .unwrap_or(RegisterValue::Undetermined)
    }

    /// Every SSA variable with a definition in this function, in IL order
    pub fn defined_variables(&self) -> Vec<&SSAVariable> {
        self.instructions
            .iter()
            .flat_map(|&i| self.exprs[i.0].kind.defined_variables())
            .collect()
    }

    pub fn identity_of(&self, var: &SSAVariable) -> SSAVariableIdentity {
        SSAVariableIdentity {
            var: var.clone(),
            function_start: self.start,
        }
    }
}

impl std::ops::Index<ExprIndex> for Function {
    type Output = Expr;
    fn index(&self, idx: ExprIndex) -> &Expr {
        &self.exprs[idx.0]
    }
}
