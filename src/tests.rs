use crate::il::{ExprKind, Function, SSAVariable};

#[cfg(test)]
use crate::alias::VariableAliasSet;
#[cfg(test)]
use crate::config::RecoveryConfig;
#[cfg(test)]
use crate::host::{AnalysisHost, ExportedBinary};
#[cfg(test)]
use crate::recovery::GlobalVariableRecovery;
#[cfg(test)]
use crate::resolver::SSAVariableResolver;
#[cfg(test)]
use crate::value_set::{FunctionValueSets, PossibleValue, ValueSet};

#[cfg(test)]
fn assert_unorderedset_eq<T: Eq + std::hash::Hash + Ord + std::fmt::Debug>(
    a: impl IntoIterator<Item = T>,
    b: impl IntoIterator<Item = T>,
) {
    use crate::containers::unordered::UnorderedSet;
    let a: UnorderedSet<_> = a.into_iter().collect();
    let b: UnorderedSet<_> = b.into_iter().collect();
    assert_eq!(a, b)
}

/// `a#2 = b#1 + 1` and `b#1 = a#2`, followed by two phis that only refer to each other (and to an
/// entry value).
pub fn cyclic_function() -> Function {
    let v = SSAVariable::new;
    let mut f = Function::new("cyclic", 0x2000);

    let b1 = f.add_expr(0x2000, ExprKind::VarSsa { src: v("b", 1) });
    let one = f.add_expr(0x2000, ExprKind::Const { constant: 1 });
    let add = f.add_expr(
        0x2000,
        ExprKind::Add {
            left: b1,
            right: one,
        },
    );
    f.add_instruction(
        0x2000,
        ExprKind::SetVarSsa {
            dest: v("a", 2),
            src: add,
        },
    );

    let a2 = f.add_expr(0x2004, ExprKind::VarSsa { src: v("a", 2) });
    f.add_instruction(
        0x2004,
        ExprKind::SetVarSsa {
            dest: v("b", 1),
            src: a2,
        },
    );

    f.add_instruction(
        0x2008,
        ExprKind::VarPhi {
            dest: v("p", 1),
            src: vec![v("q", 1), v("c", 0)],
        },
    );
    f.add_instruction(
        0x200c,
        ExprKind::VarPhi {
            dest: v("q", 1),
            src: vec![v("p", 1), v("c", 0)],
        },
    );
    f
}

/// `x#3 = x#2`, `x#2 = x#1`, `x#1 = 1`: each hop needs its own worklist node.
pub fn copy_chain_function() -> Function {
    let v = SSAVariable::new;
    let mut f = Function::new("copy_chain", 0x3000);
    let c = f.add_expr(0x3000, ExprKind::Const { constant: 1 });
    f.add_instruction(
        0x3000,
        ExprKind::SetVarSsa {
            dest: v("x", 1),
            src: c,
        },
    );
    let x1 = f.add_expr(0x3004, ExprKind::VarSsa { src: v("x", 1) });
    f.add_instruction(
        0x3004,
        ExprKind::SetVarSsa {
            dest: v("x", 2),
            src: x1,
        },
    );
    let x2 = f.add_expr(0x3008, ExprKind::VarSsa { src: v("x", 2) });
    f.add_instruction(
        0x3008,
        ExprKind::SetVarSsa {
            dest: v("x", 3),
            src: x2,
        },
    );
    f
}

#[cfg(test)]
fn var(s: &str) -> SSAVariable {
    SSAVariable::parse(s).unwrap()
}

#[cfg(test)]
fn resolve_with(f: &Function, v: &str, config: &RecoveryConfig) -> ValueSet {
    let mut cache = FunctionValueSets::new();
    SSAVariableResolver::resolve(&var(v), f, &mut cache, config)
}

/// A host holding a single function `f` at `0x1000` with the given listing
#[cfg(test)]
fn single_function(listing: &str) -> ExportedBinary {
    crate::export_lifter::lift_from(&format!("FUNCTION 1000 f\n{}", listing)).unwrap()
}

#[cfg(test)]
fn resolve_in(host: &ExportedBinary, v: &str) -> ValueSet {
    resolve_with(
        host.function_at(0x1000).unwrap(),
        v,
        &RecoveryConfig::default(),
    )
}

#[cfg(test)]
fn sample() -> ExportedBinary {
    crate::export_lifter::lift_from(include_str!("../tests/sample.exported")).unwrap()
}

#[test]
fn cycles_terminate_and_dispatch_once() {
    let f = cyclic_function();
    let config = RecoveryConfig::default();
    let cache = FunctionValueSets::new();

    let def = f.get_ssa_var_definition(&var("a#2")).unwrap();
    let mut resolver = SSAVariableResolver::new(&f, &cache, &config);
    let values = resolver.resolve_from(def);
    assert_unorderedset_eq(values, [PossibleValue::Constant(1)]);

    // Both definitions, the add and its two operands, and the use of `a#2` in `b#1`
    let dispatched = resolver.dispatched_nodes();
    assert_eq!(dispatched.len(), 6);
    let distinct: std::collections::BTreeSet<_> = dispatched.iter().collect();
    assert_eq!(distinct.len(), dispatched.len());
}

#[test]
fn mutual_phis_are_kept_symbolic() {
    let f = cyclic_function();
    assert_unorderedset_eq(
        resolve_with(&f, "p#1", &RecoveryConfig::default()),
        [
            PossibleValue::UnresolvedSymbolic(f.identity_of(&var("q#1"))),
            PossibleValue::UnresolvedSymbolic(f.identity_of(&var("c#0"))),
        ],
    );
}

#[test]
fn resolution_is_idempotent() {
    let f = cyclic_function();
    let config = RecoveryConfig::default();
    let mut cache = FunctionValueSets::new();

    let first = SSAVariableResolver::resolve(&var("a#2"), &f, &mut cache, &config);
    let cached = cache.get(f.start, &var("a#2")).cloned();
    let second = SSAVariableResolver::resolve(&var("a#2"), &f, &mut cache, &config);

    assert_eq!(first, second);
    assert_eq!(cached, Some(second));
}

#[test]
fn constants() {
    let host = single_function(
        "\t1000\t(SET_VAR_SSA x#1 (CONST 5))\n\
         \t1004\t(SET_VAR_SSA y#1 (CONST_PTR 4000))\n",
    );
    assert_unorderedset_eq(resolve_in(&host, "x#1"), [PossibleValue::Constant(5)]);
    assert_unorderedset_eq(
        resolve_in(&host, "y#1"),
        [PossibleValue::ConstantPointer(0x4000)],
    );
}

#[test]
fn add_unions_operands() {
    let host = single_function("\t1000\t(SET_VAR_SSA x#1 (ADD (CONST 5) (CONST 3)))\n");
    assert_unorderedset_eq(
        resolve_in(&host, "x#1"),
        [PossibleValue::Constant(5), PossibleValue::Constant(3)],
    );
}

#[test]
fn first_concrete_phi_operand_wins() {
    let host = single_function(
        "pv b#1 const 7\n\
         pv c#1 const 9\n\
         \t1000\t(VAR_PHI x#1 a#1 b#1 c#1)\n",
    );
    assert_unorderedset_eq(resolve_in(&host, "x#1"), [PossibleValue::Constant(7)]);
}

#[test]
fn undetermined_assignment_falls_through_to_source() {
    let host = single_function(
        "pv x#1 undetermined\n\
         pv y#1 const 3\n\
         \t1000\t(SET_VAR_SSA x#1 (CONST 42))\n\
         \t1004\t(SET_VAR_SSA y#1 (CONST 42))\n",
    );
    assert_unorderedset_eq(resolve_in(&host, "x#1"), [PossibleValue::Constant(0x42)]);
    // A concrete classification of the destination is taken over as-is
    assert_unorderedset_eq(resolve_in(&host, "y#1"), [PossibleValue::Constant(3)]);
}

#[test]
fn variable_references_follow_definitions() {
    let host = single_function(
        "\t1000\t(SET_VAR_SSA y#1 (CONST 2))\n\
         \t1004\t(SET_VAR_SSA x#1 (VAR_SSA y#1))\n\
         \t1008\t(SET_VAR_SSA z#1 (VAR_SSA __return_addr#0))\n",
    );
    assert_unorderedset_eq(resolve_in(&host, "x#1"), [PossibleValue::Constant(2)]);

    let f = host.function_at(0x1000).unwrap();
    assert_unorderedset_eq(
        resolve_in(&host, "z#1"),
        [PossibleValue::UnresolvedSymbolic(
            f.identity_of(&var("__return_addr#0")),
        )],
    );
}

#[test]
fn loads_contribute_nothing() {
    let host = single_function(
        "\t1000\t(SET_VAR_SSA p#1 (CONST_PTR 4000))\n\
         \t1004\t(SET_VAR_SSA x#1 (LOAD_SSA (VAR_SSA p#1)))\n\
         \t1008\t(SET_VAR_SSA y#1 (LOAD_SSA (CONST_PTR 4000)))\n",
    );
    let f = host.function_at(0x1000).unwrap();
    let config = RecoveryConfig::default();
    let cache = FunctionValueSets::new();

    let mut resolver = SSAVariableResolver::new(f, &cache, &config);
    let values = resolver.resolve_from(f.get_ssa_var_definition(&var("x#1")).unwrap());
    assert!(values.is_empty());
    // The address is still traced back to its definition
    assert!(resolver
        .dispatched_nodes()
        .contains(&f.get_ssa_var_definition(&var("p#1")).unwrap()));

    assert!(resolve_in(&host, "y#1").is_empty());
}

#[test]
fn aliased_variables() {
    let host = single_function(
        "\t1000\t(SET_VAR_ALIASED s#2 (CONST 8))\n\
         \t1004\t(SET_VAR_SSA x#1 (VAR_ALIASED s#2))\n",
    );
    let f = host.function_at(0x1000).unwrap();
    assert_unorderedset_eq(resolve_in(&host, "s#2"), [PossibleValue::Constant(8)]);
    assert_unorderedset_eq(
        resolve_in(&host, "x#1"),
        [PossibleValue::UnresolvedSymbolic(f.identity_of(&var("s#2")))],
    );
}

#[test]
fn entry_register_values() {
    let host = single_function(
        "pv x#1 entry rdi\n\
         \t1000\t(SET_VAR_SSA x#1 (VAR_SSA rdi#0))\n",
    );
    let f = host.function_at(0x1000).unwrap();
    let config = RecoveryConfig::default();

    let mut cache = FunctionValueSets::new();
    assert_unorderedset_eq(
        SSAVariableResolver::resolve(&var("x#1"), f, &mut cache, &config),
        [PossibleValue::EntryRegisterValue("rdi".into())],
    );

    let mut cache = FunctionValueSets::new();
    cache.add_entry_register_values(0x1000, "rdi", [PossibleValue::ConstantPointer(0x4000)]);
    cache.add_entry_register_values(0x1000, "rdi", [PossibleValue::Constant(0x10)]);
    assert_unorderedset_eq(
        SSAVariableResolver::resolve(&var("x#1"), f, &mut cache, &config),
        [
            PossibleValue::ConstantPointer(0x4000),
            PossibleValue::Constant(0x10),
        ],
    );
}

#[test]
fn missing_definition_is_empty_and_uncached() {
    let host = single_function("\t1000\t(SET_VAR_SSA x#1 (CONST 1))\n");
    let f = host.function_at(0x1000).unwrap();
    let mut cache = FunctionValueSets::new();
    let values =
        SSAVariableResolver::resolve(&var("rsi#0"), f, &mut cache, &RecoveryConfig::default());
    assert!(values.is_empty());
    assert_eq!(cache.get(0x1000, &var("rsi#0")), None);
}

#[test]
fn unsupported_operations_contribute_nothing() {
    let host = single_function(
        "\t1000\t(SET_VAR_SSA x#1 (SUB (CONST 1) (CONST 2)))\n\
         \t1004\t(SET_VAR_SSA y#1 (ADD (ZX 4 (VAR_SSA x#1)) (CONST 2)))\n\
         \t1008\t(SET_VAR_SSA z#1 (UNIMPL))\n",
    );
    assert!(resolve_in(&host, "x#1").is_empty());
    assert_unorderedset_eq(resolve_in(&host, "y#1"), [PossibleValue::Constant(2)]);
    assert!(resolve_in(&host, "z#1").is_empty());
}

#[test]
fn node_budget_truncates() {
    let f = copy_chain_function();
    let budget = |n| RecoveryConfig {
        max_dispatched_nodes_per_resolve: n,
        ..Default::default()
    };
    assert!(resolve_with(&f, "x#3", &budget(1)).is_empty());
    assert!(resolve_with(&f, "x#3", &budget(5)).is_empty());
    assert_unorderedset_eq(
        resolve_with(&f, "x#3", &budget(6)),
        [PossibleValue::Constant(1)],
    );
}

#[test]
fn alias_set_is_monotone() {
    let mut a = VariableAliasSet::new();
    a.insert_variable(0x1000, 0x1010);
    a.insert_variable(0x1000, 0x1008);
    assert_eq!(a.get(0x1000), Some(0x1010));
    a.record(0x1000, 0x1020);
    assert_eq!(a.get(0x1000), Some(0x1020));
    a.record(0x1000, 0x1018);
    assert_eq!(a.get(0x1000), Some(0x1020));
}

#[test]
fn alias_set_folds_onto_predecessor() {
    let mut a = VariableAliasSet::new();
    a.insert_variable(0x1000, 0x1008);
    a.record(0x1004, 0x1030);
    assert_eq!(a.len(), 1);
    assert_eq!(a.get(0x1000), Some(0x1030));
    assert!(!a.contains(0x1004));

    // Between two known starts: only the lower one grows
    a.insert_variable(0x1040, 0x1048);
    a.record(0x1020, 0x1050);
    assert_eq!(a.len(), 2);
    assert_eq!(a.get(0x1000), Some(0x1050));
    assert_eq!(a.get(0x1040), Some(0x1048));
    assert!(!a.contains(0x1020));

    // Nothing below: dropped
    a.record(0x800, 0x808);
    assert_eq!(a.len(), 2);
    assert!(!a.contains(0x800));
    assert_eq!(a.predecessor(0x1040), Some(0x1000));
    assert_eq!(a.predecessor(0x1000), None);
}

#[test]
fn alias_set_sizes() {
    let mut a = VariableAliasSet::new();
    a.insert_variable(0x1030, 0x1038);
    a.insert_variable(0x1000, 0x1008);
    a.insert_variable(0x1010, 0x1040);
    assert_eq!(
        a.sized_variables(),
        vec![(0x1000, 0x10), (0x1010, 0x20), (0x1030, 0)]
    );
    assert_eq!(
        format!("{:?}", a),
        "{ (1000 : 1008), (1010 : 1040), (1030 : 1038) }"
    );
}

#[test]
fn scan_finds_data_variables() {
    let host = sample();
    let (vars, xrefs) = crate::scanner::scan(&host);
    assert_eq!(
        vars.iter().collect::<Vec<_>>(),
        vec![
            (0x4000, 0x4010),
            (0x4010, 0x4040),
            (0x4040, 0x4080),
            // No data variable after it: unknown extent
            (0x4080, 0x4080),
        ]
    );

    let main = host.function_at(0x1000).unwrap();
    assert_unorderedset_eq(
        xrefs.at(0x1004).unwrap().iter().cloned(),
        [(
            0x4000,
            crate::scanner::XrefSite {
                function_start: 0x1000,
                instruction: main.instruction_at_address(0x1004).unwrap(),
            },
        )],
    );
    assert_eq!(xrefs.len(), 2);
}

#[test]
fn lifting() {
    let host = sample();
    assert_eq!(host.name, "sample");
    assert_eq!(host.address_size(), 8);
    assert_eq!(host.sections().len(), 3);
    assert!(host.is_executable(0x1010));
    assert!(!host.is_executable(0x4010));
    assert!(host.is_data_address(0x4010));
    assert!(!host.is_data_address(0x6000));
    assert_eq!(host.function_starts(), vec![0x1000, 0x1040, 0x1080, 0x6000]);
    assert_eq!(host.next_data_var_after(0x4010), 0x4040);
    assert_eq!(host.next_data_var_after(0x4080), 0x4080);

    let helper = host.function_at(0x1040).unwrap();
    assert_eq!(helper.params, vec!["rdi".to_owned()]);
    let (_, call) = host
        .function_at(0x1000)
        .unwrap()
        .instructions()
        .nth(2)
        .unwrap();
    assert_eq!(call.address, 0x1008);
    assert_eq!(call.kind.operation_name(), "CALL_SSA");
    assert_eq!(call.kind.defined_variables(), vec![&var("rax#2")]);

    let unreached = host.function_at(0x1080).unwrap();
    let (_, cmp) = unreached.instructions().nth(2).unwrap();
    assert_eq!(cmp.kind.operation_name(), "CMP_E");
    assert_eq!(cmp.kind.operands().len(), 2);
}

#[test]
fn lifting_errors() {
    use crate::error::Error;
    match crate::export_lifter::lift_from("PROGRAM\nname x\nbogus line\n") {
        Err(Error::Parse { line: 3, .. }) => {}
        r => panic!("Unexpected {:?}", r.map(|b| b.name)),
    }
    match crate::export_lifter::lift_from("FUNCTION 10 f\n\t10\t(ADD (CONST 1)\n") {
        Err(Error::Parse { line: 2, .. }) => {}
        r => panic!("Unexpected {:?}", r.map(|b| b.name)),
    }
    match crate::export_lifter::lift_from("SECTIONS\n0 10 rq .odd\n") {
        Err(Error::Parse { line: 2, .. }) => {}
        r => panic!("Unexpected {:?}", r.map(|b| b.name)),
    }
    match crate::export_lifter::lift_from("PROGRAM\nname x\naddress_size 3\n") {
        Err(Error::Parse { line: 3, .. }) => {}
        r => panic!("Unexpected {:?}", r.map(|b| b.name)),
    }
    assert_eq!(
        crate::export_lifter::lift_from("PROGRAM\naddress_size 4\n")
            .unwrap()
            .address_size(),
        4
    );
}

/// One `SET_VAR_SSA` line whose source is `depth` nested `ADD`s
#[cfg(test)]
fn nested_adds(depth: usize) -> String {
    let mut line = String::from("FUNCTION 10 f\n\t10\t(SET_VAR_SSA x#1 ");
    for _ in 0..depth {
        line.push_str("(ADD ");
    }
    line.push_str("(CONST 1)");
    for _ in 0..depth {
        line.push_str(" (CONST 2))");
    }
    line.push_str(")\n");
    line
}

#[test]
fn deeply_nested_expressions_are_rejected() {
    use crate::error::Error;
    use crate::export_lifter::{lift_from, MAX_EXPRESSION_DEPTH};

    // The source of `SET_VAR_SSA` is itself one level deep
    let host = lift_from(&nested_adds(MAX_EXPRESSION_DEPTH - 1)).unwrap();
    assert_unorderedset_eq(
        resolve_with(
            host.function_at(0x10).unwrap(),
            "x#1",
            &RecoveryConfig::default(),
        ),
        [PossibleValue::Constant(1), PossibleValue::Constant(2)],
    );

    match lift_from(&nested_adds(MAX_EXPRESSION_DEPTH)) {
        Err(Error::Parse { line: 2, .. }) => {}
        r => panic!("Unexpected {:?}", r.map(|b| b.name)),
    }
    match lift_from(&nested_adds(200_000)) {
        Err(Error::Parse { line: 2, .. }) => {}
        r => panic!("Unexpected {:?}", r.map(|b| b.name)),
    }
}

#[test]
fn deep_expression_trees_resolve() {
    let mut f = Function::new("deep", 0x5000);
    let mut e = f.add_expr(0x5000, ExprKind::Const { constant: 1 });
    for i in 0..50_000 {
        let right = f.add_expr(0x5000, ExprKind::Const { constant: i });
        e = f.add_expr(0x5000, ExprKind::Add { left: e, right });
    }
    f.add_instruction(
        0x5000,
        ExprKind::SetVarSsa {
            dest: var("x#1"),
            src: e,
        },
    );

    let config = RecoveryConfig {
        max_dispatched_nodes_per_resolve: usize::MAX,
        ..Default::default()
    };
    let values = resolve_with(&f, "x#1", &config);
    assert_eq!(values.len(), 50_000);
    assert!(values.contains(&PossibleValue::Constant(49_999)));
}

#[test]
fn addresses_at_the_top_of_memory() {
    let host = crate::export_lifter::lift_from(
        "PROGRAM\n\
         name top\n\
         address_size 8\n\
         \n\
         SECTIONS\n\
         1000 1100 rx .text\n\
         fffffffffffff000 ffffffffffffffff rw .data\n\
         \n\
         SYMBOLS\n\
         1000 function main\n\
         fffffffffffffffc data last\n\
         \n\
         DATA_VARIABLES\n\
         fffffffffffffffc\n\
         \n\
         FUNCTION 1000 main\n\
         params\n\
         \t1000\t(SET_VAR_SSA rax#1 (CONST_PTR fffffffffffffffe))\n",
    )
    .unwrap();
    let config = RecoveryConfig::default();

    let mut recovery = GlobalVariableRecovery::with_config(&host, &config);
    recovery.identify_exported_symbols();
    assert_eq!(recovery.alias_set().get(0xffff_ffff_ffff_fffc), Some(u64::MAX));
    recovery.identify_data_variables();
    recovery.recover_from_entrypoint("main").unwrap();
    assert_eq!(recovery.alias_set().get(0xffff_ffff_ffff_fffc), Some(u64::MAX));
    assert_eq!(
        recovery
            .to_module()
            .global_vars
            .iter()
            .map(|v| (v.ea, v.size))
            .collect::<Vec<_>>(),
        vec![(0xffff_ffff_ffff_fffc, 0)]
    );
}

#[test]
fn module_encoding() {
    use crate::cfg_module::{GlobalVariable, Module};
    let m = Module {
        name: "M".into(),
        global_vars: vec![GlobalVariable::new(0x10, 4)],
    };
    let mut expected = vec![0x0a, 0x01, b'M', 0x32, 19, 0x08, 0x10, 0x12, 13];
    expected.extend_from_slice(b"global_var_10");
    expected.extend_from_slice(&[0x18, 0x04]);
    assert_eq!(m.encode(), expected);

    // Multi-byte varints, and a zero size that is still emitted
    let m = Module {
        name: "".into(),
        global_vars: vec![GlobalVariable::new(0x4000, 0)],
    };
    let encoded = m.encode();
    assert_eq!(&encoded[..7], &[0x0a, 0x00, 0x32, 23, 0x08, 0x80, 0x80]);
    assert_eq!(encoded[7], 0x01);
    assert_eq!(&encoded[encoded.len() - 2..], &[0x18, 0x00]);
}

#[test]
fn end_to_end() {
    let host = sample();
    let config = RecoveryConfig::default();
    let module = GlobalVariableRecovery::with_config(&host, &config)
        .run("main")
        .unwrap();

    assert_eq!(module.name, "GlobalVariables");
    assert_eq!(
        module
            .global_vars
            .iter()
            .map(|v| (v.ea, v.name.as_str(), v.size))
            .collect::<Vec<_>>(),
        vec![
            (0x4000, "global_var_4000", 0x10),
            (0x4010, "global_var_4010", 0),
        ]
    );

    // Every exported variable comes from a data symbol
    for v in &module.global_vars {
        assert!(host
            .symbols()
            .iter()
            .any(|s| s.address == v.ea && s.kind == crate::host::SymbolKind::Data));
    }
}

#[test]
fn recovery_state() {
    let host = sample();
    let config = RecoveryConfig::default();
    let mut recovery = GlobalVariableRecovery::with_config(&host, &config);

    recovery.identify_exported_symbols();
    assert_eq!(
        recovery.alias_set().iter().collect::<Vec<_>>(),
        vec![(0x4000, 0x4008), (0x4010, 0x4018)]
    );

    recovery.identify_data_variables();
    recovery.recover_from_entrypoint("main").unwrap();
    assert_eq!(
        recovery.alias_set().iter().collect::<Vec<_>>(),
        vec![
            (0x4000, 0x4008),
            // The pointers to 0x4040 and 0x4084 fold onto the variable at 0x4010. The plain
            // constant 0x4080 is not taken as a pointer.
            (0x4010, 0x408c),
        ]
    );
    assert_unorderedset_eq(
        recovery.recovered_functions().iter().cloned(),
        [0x1000, 0x1040, 0x1080, 0x6000],
    );

    // Forwarded from the call in `main`
    assert_unorderedset_eq(
        recovery
            .value_sets()
            .get_entry_register(0x1040, "rdi")
            .unwrap()
            .iter()
            .cloned(),
        [PossibleValue::ConstantPointer(0x4040)],
    );
    assert_unorderedset_eq(
        recovery
            .value_sets()
            .get(0x1040, &var("rcx#1"))
            .unwrap()
            .iter()
            .cloned(),
        [
            PossibleValue::EntryRegisterValue("rdi".into()),
            PossibleValue::Constant(8),
        ],
    );

    let dot = recovery.xrefs().generate_dot(recovery.alias_set());
    assert!(dot.contains("sub_1000"));
    assert!(dot.contains("global_var_4000"));
    assert!(dot.contains("0x1004"));
}

#[test]
fn recovery_without_forwarding_or_round_robin() {
    let host = sample();
    let config = RecoveryConfig {
        forward_entry_register_values: false,
        round_robin_function_discovery: false,
        ..Default::default()
    };
    let mut recovery = GlobalVariableRecovery::with_config(&host, &config);
    recovery.identify_exported_symbols();
    recovery.identify_data_variables();
    recovery.recover_from_entrypoint("main").unwrap();

    assert_unorderedset_eq(
        recovery.recovered_functions().iter().cloned(),
        [0x1000, 0x1040, 0x6000],
    );
    assert_eq!(recovery.value_sets().get_entry_register(0x1040, "rdi"), None);
    assert_unorderedset_eq(
        recovery
            .value_sets()
            .get(0x1040, &var("rax#1"))
            .unwrap()
            .iter()
            .cloned(),
        [PossibleValue::EntryRegisterValue("rdi".into())],
    );
    assert_eq!(
        recovery
            .to_module()
            .global_vars
            .iter()
            .map(|v| (v.ea, v.size))
            .collect::<Vec<_>>(),
        vec![(0x4000, 0x10), (0x4010, 0)]
    );
    assert_eq!(recovery.alias_set().get(0x4010), Some(0x4080));
}

#[test]
fn missing_entry_point() {
    let host = sample();
    let config = RecoveryConfig::default();
    let mut recovery = GlobalVariableRecovery::with_config(&host, &config);
    match recovery.recover_from_entrypoint("nope") {
        Err(crate::error::Error::MissingEntryPoint(name)) => assert_eq!(name, "nope"),
        r => panic!("Unexpected {:?}", r),
    }
    assert!(recovery.recovered_functions().is_empty());
}

#[test]
fn symbolic_execution_hooks() {
    use crate::symbolic::{HookError, SymbolicExecutionHooks};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        installed: Vec<u64>,
        runs: usize,
    }
    struct Hooks(Rc<RefCell<Recorder>>);
    impl SymbolicExecutionHooks for Hooks {
        fn install_hook(
            &mut self,
            function_start: u64,
            function_name: &str,
        ) -> Result<(), HookError> {
            self.0.borrow_mut().installed.push(function_start);
            if function_name == "helper" {
                return Err(HookError::Install {
                    function_start,
                    function_name: function_name.to_owned(),
                    reason: "no engine".into(),
                });
            }
            Ok(())
        }
        fn run(&mut self) -> Result<(), HookError> {
            self.0.borrow_mut().runs += 1;
            Err(HookError::Run("no engine".into()))
        }
    }

    let host = sample();
    let recorder = Rc::new(RefCell::new(Recorder::default()));

    let config = RecoveryConfig {
        install_symbolic_execution_hooks: true,
        ..Default::default()
    };
    let module = GlobalVariableRecovery::with_config(&host, &config)
        .with_hooks(Box::new(Hooks(recorder.clone())))
        .run("main")
        .unwrap();
    assert_eq!(module.global_vars.len(), 2);
    assert_eq!(recorder.borrow().installed, vec![0x1000, 0x1040, 0x1080]);
    assert_eq!(recorder.borrow().runs, 1);

    // Not installed unless asked for
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    let config = RecoveryConfig::default();
    GlobalVariableRecovery::with_config(&host, &config)
        .with_hooks(Box::new(Hooks(recorder.clone())))
        .run("main")
        .unwrap();
    assert!(recorder.borrow().installed.is_empty());
    assert_eq!(recorder.borrow().runs, 0);
}
