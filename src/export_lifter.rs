//! A lifter from the disassembler's analysis export
//!
//! The export is a plain-text dump of everything the recovery needs from the host: sections,
//! symbols, data variables, code references, and the MLIL-SSA of each function, one instruction
//! per line as an S-expression.

use crate::error::Error;
use crate::host::{AnalysisHost, CodeRef, ExportedBinary, Section, Symbol, SymbolKind};
use crate::il::{ExprIndex, ExprKind, Function, RegisterValue, SSAVariable};
use crate::log::*;

use itertools::Itertools;

/// Deepest nesting of sub-expressions accepted within a single instruction
pub const MAX_EXPRESSION_DEPTH: usize = 128;

/// Lift an analysis export to a host the recovery can be run against.
pub fn lift_from(exported: &str) -> Result<ExportedBinary, Error> {
    let mut binary = ExportedBinary::new("", 8);
    let mut state = State::BetweenSections;

    for (lineno, line) in exported.lines().enumerate() {
        let lineno = lineno + 1;
        let line = line.trim();

        if line.is_empty() {
            if let State::Function(f) = std::mem::replace(&mut state, State::BetweenSections) {
                finish_function(&mut binary, f);
            }
            continue;
        }

        if let State::BetweenSections = state {
            state = parse_section_header(line).map_err(|m| Error::parse(lineno, m))?;
            continue;
        }

        let result = match &mut state {
            State::BetweenSections => Ok(()),
            State::Program => parse_program_line(&mut binary, line),
            State::Sections => parse_section_line(line).map(|s| binary.add_section(s)),
            State::Symbols => parse_symbol_line(line).map(|s| binary.add_symbol(s)),
            State::DataVariables => parse_hex(line).map(|a| binary.add_data_variable(a)),
            State::CodeRefs => {
                parse_code_ref_line(line).map(|(var, code_ref)| binary.add_code_ref(var, code_ref))
            }
            State::Function(f) => parse_function_line(f, line),
        };
        result.map_err(|m| Error::parse(lineno, m))?;
    }
    if let State::Function(f) = state {
        finish_function(&mut binary, f);
    }

    debug!(
        "Lifted analysis export";
        "name" => &binary.name,
        "sections" => binary.sections().len(),
        "symbols" => binary.symbols().len(),
        "functions" => binary.function_starts().len(),
    );

    Ok(binary)
}

/// The section of the export being parsed
enum State {
    BetweenSections,
    Program,
    Sections,
    Symbols,
    DataVariables,
    CodeRefs,
    Function(Function),
}

fn parse_section_header(line: &str) -> Result<State, String> {
    Ok(match line.split_whitespace().collect_vec().as_slice() {
        ["PROGRAM"] => State::Program,
        ["SECTIONS"] => State::Sections,
        ["SYMBOLS"] => State::Symbols,
        ["DATA_VARIABLES"] => State::DataVariables,
        ["CODE_REFS"] => State::CodeRefs,
        ["FUNCTION", start, name @ ..] if !name.is_empty() => {
            State::Function(Function::new(name.join(" "), parse_hex(start)?))
        }
        l => return Err(format!("Expected a section header, got {:?}", l)),
    })
}

fn finish_function(binary: &mut ExportedBinary, function: Function) {
    trace!(
        "Lifted function";
        "name" => &function.name,
        "start" => format!("{:#x}", function.start),
        "nodes" => function.len(),
    );
    if let Some(earlier) = binary.add_function(function) {
        warn!(
            "Duplicate function start, keeping the later one";
            "start" => format!("{:#x}", earlier.start),
            "name" => &earlier.name,
        );
    }
}

fn parse_hex(s: &str) -> Result<u64, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| format!("Bad hex number {:?}: {}", s, e))
}

fn parse_var(s: &str) -> Result<SSAVariable, String> {
    SSAVariable::parse(s)
        .ok_or_else(|| format!("Expected an SSA variable `name#version`, got {:?}", s))
}

fn parse_program_line(binary: &mut ExportedBinary, line: &str) -> Result<(), String> {
    match line.split_whitespace().collect_vec().as_slice() {
        ["name", name @ ..] if !name.is_empty() => binary.name = name.join(" "),
        ["address_size", size] => {
            binary.address_size = match size.parse::<u64>() {
                Ok(size @ (1 | 2 | 4 | 8)) => size,
                Ok(size) => return Err(format!("Unsupported address size {}", size)),
                Err(e) => return Err(format!("Bad address size {:?}: {}", size, e)),
            }
        }
        l => return Err(format!("Expected `name` or `address_size`, got {:?}", l)),
    }
    Ok(())
}

fn parse_section_line(line: &str) -> Result<Section, String> {
    match line.split_whitespace().collect_vec().as_slice() {
        [start, end, flags, name @ ..] if !name.is_empty() => {
            if let Some(c) = flags.chars().find(|c| !"rwxe-".contains(*c)) {
                return Err(format!("Unknown section flag {:?}", c));
            }
            Ok(Section {
                name: name.join(" "),
                start: parse_hex(start)?,
                end: parse_hex(end)?,
                executable: flags.contains('x'),
                external: flags.contains('e'),
            })
        }
        l => Err(format!("Expected `start end flags name`, got {:?}", l)),
    }
}

fn parse_symbol_line(line: &str) -> Result<Symbol, String> {
    match line.split_whitespace().collect_vec().as_slice() {
        [addr, kind, name @ ..] if !name.is_empty() => Ok(Symbol {
            address: parse_hex(addr)?,
            kind: match *kind {
                "function" => SymbolKind::Function,
                "imported_function" => SymbolKind::ImportedFunction,
                "data" => SymbolKind::Data,
                "imported_data" => SymbolKind::ImportedData,
                k => return Err(format!("Unknown symbol kind {:?}", k)),
            },
            name: name.join(" "),
        }),
        l => Err(format!("Expected `addr kind name`, got {:?}", l)),
    }
}

fn parse_code_ref_line(line: &str) -> Result<(u64, CodeRef), String> {
    match line.split_whitespace().collect_vec().as_slice() {
        [var, function_start, address] => Ok((
            parse_hex(var)?,
            CodeRef {
                function_start: parse_hex(function_start)?,
                address: parse_hex(address)?,
            },
        )),
        l => Err(format!("Expected `var function_start insn_addr`, got {:?}", l)),
    }
}

fn parse_function_line(function: &mut Function, line: &str) -> Result<(), String> {
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match head {
        "params" => {
            function.params = rest.split_whitespace().map(|r| r.to_owned()).collect();
        }
        "pv" => {
            let value = match rest.split_whitespace().collect_vec().as_slice() {
                [var, "undetermined"] => (parse_var(var)?, RegisterValue::Undetermined),
                [var, "const", v] => (parse_var(var)?, RegisterValue::Constant(parse_hex(v)?)),
                [var, "const_ptr", v] => (
                    parse_var(var)?,
                    RegisterValue::ConstantPointer(parse_hex(v)?),
                ),
                [var, "entry", reg] => (
                    parse_var(var)?,
                    RegisterValue::EntryValue(reg.to_string()),
                ),
                l => return Err(format!("Bad possible value {:?}", l)),
            };
            function.set_possible_value(value.0, value.1);
        }
        addr => {
            let address = parse_hex(addr)?;
            let mut parser = ExprParser {
                tokens: tokenize(rest.trim()),
                pos: 0,
                depth: 0,
                function: &mut *function,
                address,
            };
            let kind = parser.parse_kind()?;
            if parser.pos != parser.tokens.len() {
                return Err(format!(
                    "Trailing input after expression: {:?}",
                    &parser.tokens[parser.pos..]
                ));
            }
            function.add_instruction(address, kind);
        }
    }
    Ok(())
}

/// Split an S-expression into brackets and atoms.
fn tokenize(s: &str) -> Vec<&str> {
    let mut tokens = vec![];
    let mut atom_start: Option<usize> = None;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() || "()[]".contains(c) {
            if let Some(st) = atom_start.take() {
                tokens.push(&s[st..i]);
            }
            if !c.is_whitespace() {
                tokens.push(&s[i..i + 1]);
            }
        } else if atom_start.is_none() {
            atom_start = Some(i);
        }
    }
    if let Some(st) = atom_start {
        tokens.push(&s[st..]);
    }
    tokens
}

struct ExprParser<'a, 'f> {
    tokens: Vec<&'a str>,
    pos: usize,
    /// Nesting depth of the sub-expression being parsed
    depth: usize,
    function: &'f mut Function,
    /// Machine address shared by every node of the instruction being parsed
    address: u64,
}

impl<'a, 'f> ExprParser<'a, 'f> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).cloned()
    }

    fn next(&mut self) -> Result<&'a str, String> {
        let tok = self.peek().ok_or("Unexpected end of expression")?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, tok: &str) -> Result<(), String> {
        match self.next()? {
            t if t == tok => Ok(()),
            t => Err(format!("Expected {:?}, got {:?}", tok, t)),
        }
    }

    fn var(&mut self) -> Result<SSAVariable, String> {
        parse_var(self.next()?)
    }

    /// Parse a sub-expression into the function's arena.
    fn operand(&mut self) -> Result<ExprIndex, String> {
        if self.depth >= MAX_EXPRESSION_DEPTH {
            return Err(format!(
                "Expression nested deeper than {} levels",
                MAX_EXPRESSION_DEPTH
            ));
        }
        self.depth += 1;
        let kind = self.parse_kind();
        self.depth -= 1;
        Ok(self.function.add_expr(self.address, kind?))
    }

    fn parse_kind(&mut self) -> Result<ExprKind, String> {
        self.expect("(")?;
        let kind = match self.next()? {
            "CONST" => ExprKind::Const {
                constant: parse_hex(self.next()?)?,
            },
            "CONST_PTR" => ExprKind::ConstPtr {
                constant: parse_hex(self.next()?)?,
            },
            "LOAD_SSA" => ExprKind::LoadSsa {
                src: self.operand()?,
            },
            "ADD" => {
                let left = self.operand()?;
                let right = self.operand()?;
                ExprKind::Add { left, right }
            }
            "VAR_SSA" => ExprKind::VarSsa { src: self.var()? },
            "SET_VAR_SSA" => {
                let dest = self.var()?;
                let src = self.operand()?;
                ExprKind::SetVarSsa { dest, src }
            }
            "VAR_ALIASED" => ExprKind::VarAliased { src: self.var()? },
            "SET_VAR_ALIASED" => {
                let dest = self.var()?;
                let src = self.operand()?;
                ExprKind::SetVarAliased { dest, src }
            }
            "VAR_PHI" => {
                let dest = self.var()?;
                let mut src = vec![];
                while self.peek() != Some(")") {
                    src.push(self.var()?);
                }
                ExprKind::VarPhi { dest, src }
            }
            "CALL_SSA" => {
                self.expect("[")?;
                let mut output = vec![];
                while self.peek() != Some("]") {
                    output.push(self.var()?);
                }
                self.expect("]")?;
                let dest = self.operand()?;
                let mut params = vec![];
                while self.peek() != Some(")") {
                    params.push(self.operand()?);
                }
                ExprKind::CallSsa {
                    output,
                    dest,
                    params,
                }
            }
            "(" | ")" | "[" | "]" => return Err("Expected an operation name".into()),
            operation => {
                let mut operands = vec![];
                loop {
                    match self.peek() {
                        Some(")") => break,
                        Some("(") => operands.push(self.operand()?),
                        Some(_) => {
                            // Non-expression operands (sizes, flags, ...) are of no use
                            self.next()?;
                        }
                        None => return Err("Unexpected end of expression".into()),
                    }
                }
                ExprKind::Unsupported {
                    operation: operation.to_owned(),
                    operands,
                }
            }
        };
        self.expect(")")?;
        Ok(kind)
    }
}
