//! Dispatch of IL expression nodes to per-operation handlers.
//!
//! A visitor overrides the handlers for the operations it understands. Every other operation falls
//! through to [`ILVisitor::unhandled`], which logs and contributes nothing; unseen instruction
//! forms are routine in real binaries and must never stop an analysis.

use crate::il::{ExprIndex, ExprKind, Function, SSAVariable};
use crate::log::*;
use crate::value_set::ValueSet;

pub trait ILVisitor<'f> {
    /// The function whose nodes are being visited
    fn function(&self) -> &'f Function;

    /// Route the node at `idx` to the handler for its operation.
    fn visit(&mut self, idx: ExprIndex) -> ValueSet {
        let function = self.function();
        let expr = match function.get(idx) {
            Some(expr) => expr,
            None => {
                debug!(
                    "Expression index out of range. Ignoring.";
                    "idx" => ?idx,
                    "function" => &function.name,
                );
                return ValueSet::new();
            }
        };
        match &expr.kind {
            ExprKind::Const { constant } => self.visit_const(idx, *constant),
            ExprKind::ConstPtr { constant } => self.visit_const_ptr(idx, *constant),
            ExprKind::LoadSsa { src } => self.visit_load_ssa(idx, *src),
            ExprKind::Add { left, right } => self.visit_add(idx, *left, *right),
            ExprKind::VarSsa { src } => self.visit_var_ssa(idx, src),
            ExprKind::SetVarSsa { dest, src } => self.visit_set_var_ssa(idx, dest, *src),
            ExprKind::VarAliased { src } => self.visit_var_aliased(idx, src),
            ExprKind::SetVarAliased { dest, src } => self.visit_set_var_aliased(idx, dest, *src),
            ExprKind::VarPhi { dest, src } => self.visit_var_phi(idx, dest, src),
            ExprKind::CallSsa {
                output,
                dest,
                params,
            } => self.visit_call_ssa(idx, output, *dest, params),
            ExprKind::Unsupported { .. } => self.unhandled(idx),
        }
    }

    /// Fallback for any operation the visitor has no handler for.
    fn unhandled(&mut self, idx: ExprIndex) -> ValueSet {
        let expr = &self.function()[idx];
        debug!(
            "No handler for operation. Ignoring.";
            "operation" => expr.kind.operation_name(),
            "addr" => format!("{:#x}", expr.address),
            "function" => &self.function().name,
        );
        ValueSet::new()
    }

    fn visit_const(&mut self, idx: ExprIndex, _constant: u64) -> ValueSet {
        self.unhandled(idx)
    }
    fn visit_const_ptr(&mut self, idx: ExprIndex, _constant: u64) -> ValueSet {
        self.unhandled(idx)
    }
    fn visit_load_ssa(&mut self, idx: ExprIndex, _src: ExprIndex) -> ValueSet {
        self.unhandled(idx)
    }
    fn visit_add(&mut self, idx: ExprIndex, _left: ExprIndex, _right: ExprIndex) -> ValueSet {
        self.unhandled(idx)
    }
    fn visit_var_ssa(&mut self, idx: ExprIndex, _src: &'f SSAVariable) -> ValueSet {
        self.unhandled(idx)
    }
    fn visit_set_var_ssa(
        &mut self,
        idx: ExprIndex,
        _dest: &'f SSAVariable,
        _src: ExprIndex,
    ) -> ValueSet {
        self.unhandled(idx)
    }
    fn visit_var_aliased(&mut self, idx: ExprIndex, _src: &'f SSAVariable) -> ValueSet {
        self.unhandled(idx)
    }
    fn visit_set_var_aliased(
        &mut self,
        idx: ExprIndex,
        _dest: &'f SSAVariable,
        _src: ExprIndex,
    ) -> ValueSet {
        self.unhandled(idx)
    }
    fn visit_var_phi(
        &mut self,
        idx: ExprIndex,
        _dest: &'f SSAVariable,
        _src: &'f [SSAVariable],
    ) -> ValueSet {
        self.unhandled(idx)
    }
    fn visit_call_ssa(
        &mut self,
        idx: ExprIndex,
        _output: &'f [SSAVariable],
        _dest: ExprIndex,
        _params: &'f [ExprIndex],
    ) -> ValueSet {
        self.unhandled(idx)
    }
}

/// A direct call found in a function: the constant target and the argument expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectCall {
    pub address: u64,
    pub target: u64,
    pub params: Vec<ExprIndex>,
}

/// Collects the direct calls of a function, i.e. those whose target is a constant.
pub struct CalleeCollector<'f> {
    function: &'f Function,
    calls: Vec<DirectCall>,
}

impl<'f> CalleeCollector<'f> {
    pub fn collect(function: &'f Function) -> Vec<DirectCall> {
        let mut collector = Self {
            function,
            calls: vec![],
        };
        for (idx, expr) in function.instructions() {
            if let ExprKind::CallSsa { .. } = expr.kind {
                collector.visit(idx);
            }
        }
        collector.calls
    }
}

impl<'f> ILVisitor<'f> for CalleeCollector<'f> {
    fn function(&self) -> &'f Function {
        self.function
    }

    fn visit_call_ssa(
        &mut self,
        idx: ExprIndex,
        _output: &'f [SSAVariable],
        dest: ExprIndex,
        params: &'f [ExprIndex],
    ) -> ValueSet {
        let function = self.function;
        match function.get(dest).and_then(|e| e.kind.constant()) {
            Some(target) => self.calls.push(DirectCall {
                address: function[idx].address,
                target,
                params: params.to_vec(),
            }),
            None => {
                trace!(
                    "Indirect call, not followed";
                    "addr" => format!("{:#x}", function[idx].address),
                    "function" => &function.name,
                );
            }
        }
        ValueSet::new()
    }
}
