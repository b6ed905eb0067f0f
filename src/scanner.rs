//! Enumeration of data variables, and of the code that refers to them.

use std::collections::BTreeMap;

use crate::alias::VariableAliasSet;
use crate::containers::unordered::{UnorderedMap, UnorderedSet};
use crate::host::{AnalysisHost, CodeRef};
use crate::il::ExprIndex;
use crate::log::*;

/// An IL instruction referring to a data variable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct XrefSite {
    pub function_start: u64,
    pub instruction: ExprIndex,
}

/// Data variables found by the scan, as `start -> end` spans. An empty span (`end == start`)
/// means the extent is unknown.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct DataVariables {
    spans: BTreeMap<u64, u64>,
}

impl DataVariables {
    pub fn add(&mut self, start: u64, end: u64) {
        self.spans.insert(start, end);
    }

    /// The end of the variable starting at `start`
    pub fn span_end(&self, start: u64) -> Option<u64> {
        self.spans.get(&start).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.spans.iter().map(|(&s, &e)| (s, e))
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Map from the address of an IL instruction to the data variables it refers to, along with the
/// referring instruction itself.
#[derive(Default, Debug)]
pub struct Xrefs {
    map: UnorderedMap<u64, UnorderedSet<(u64, XrefSite)>>,
}

impl Xrefs {
    pub fn add(&mut self, insn_address: u64, data_var: u64, site: XrefSite) {
        self.map
            .entry(insn_address)
            .or_default()
            .insert((data_var, site));
    }

    pub fn at(&self, insn_address: u64) -> Option<&UnorderedSet<(u64, XrefSite)>> {
        self.map.get(&insn_address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &(u64, XrefSite))> {
        self.map
            .iter()
            .flat_map(|(&addr, refs)| refs.iter().map(move |r| (addr, r)))
    }

    /// Number of referring instructions
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Walk every non-executable section for data variables, recording their spans and the IL
/// instructions that refer to them.
///
/// Within a section, variables are visited in ascending order through the host's "next data
/// variable" query; the walk ends once the query stops advancing, or leaves the section.
pub fn scan(host: &impl AnalysisHost) -> (DataVariables, Xrefs) {
    let mut variables = DataVariables::default();
    let mut xrefs = Xrefs::default();

    debug!("Looking for data variables"; "sections" => host.sections().len());

    for section in host.sections() {
        if section.executable {
            continue;
        }

        let mut var = section.start;
        loop {
            if !section.contains(var) {
                break;
            }
            let next_var = host.next_data_var_after(var);
            if next_var <= var {
                // Fixed point: nothing after `var`. Keep it, with an unknown extent.
                if host.is_data_variable(var) && variables.span_end(var).is_none() {
                    variables.add(var, var);
                    record_xrefs(host, var, &mut xrefs);
                }
                break;
            }
            if host.is_data_variable(var) {
                variables.add(var, next_var);
                record_xrefs(host, var, &mut xrefs);
            }
            var = next_var;
        }
    }

    debug!(
        "Data variables found";
        "count" => variables.len(),
        "referring_insns" => xrefs.len(),
    );
    (variables, xrefs)
}

fn record_xrefs(host: &impl AnalysisHost, var: u64, xrefs: &mut Xrefs) {
    for CodeRef {
        function_start,
        address,
    } in host.code_refs(var)
    {
        let instruction = host
            .function_at(function_start)
            .and_then(|f| f.instruction_at_address(address));
        match instruction {
            Some(instruction) => xrefs.add(
                address,
                var,
                XrefSite {
                    function_start,
                    instruction,
                },
            ),
            None => {
                trace!(
                    "No IL instruction at code reference";
                    "var" => format!("{:#x}", var),
                    "addr" => format!("{:#x}", address),
                );
            }
        }
    }
}

impl Xrefs {
    /// Write a Graphviz rendering of the references: one node per referring function and per
    /// referenced data variable, an edge per reference.
    pub fn write_dot<W: std::io::Write>(
        &self,
        alias_set: &VariableAliasSet,
        w: &mut W,
    ) -> std::io::Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        enum Node {
            Function(u64),
            Data(u64),
        }
        type Edge = (Node, Node, u64);

        struct Graph<'a> {
            alias_set: &'a VariableAliasSet,
            nodes: Vec<Node>,
            edges: Vec<Edge>,
        }

        impl<'a> dot::Labeller<'a, Node, Edge> for Graph<'a> {
            fn graph_id(&'a self) -> dot::Id<'a> {
                dot::Id::new("Xrefs").unwrap()
            }
            fn node_id(&'a self, n: &Node) -> dot::Id<'a> {
                dot::Id::new(match n {
                    Node::Function(addr) => format!("f{:x}", addr),
                    Node::Data(addr) => format!("d{:x}", addr),
                })
                .unwrap()
            }
            fn node_label<'b>(&'b self, n: &Node) -> dot::LabelText<'b> {
                match n {
                    Node::Function(addr) => dot::LabelText::label(format!("sub_{:x}", addr)),
                    Node::Data(addr) => {
                        let owner = if self.alias_set.contains(*addr) {
                            Some(*addr)
                        } else {
                            self.alias_set.predecessor(*addr)
                        };
                        dot::LabelText::label(match owner {
                            Some(start) if start == *addr => format!("global_var_{:x}", addr),
                            Some(start) => format!("{:x} in global_var_{:x}", addr, start),
                            None => format!("{:x}", addr),
                        })
                    }
                }
            }
            fn node_shape(&'a self, n: &Node) -> Option<dot::LabelText<'a>> {
                match n {
                    Node::Function(_) => None,
                    Node::Data(_) => Some(dot::LabelText::label("box")),
                }
            }
            fn edge_label<'b>(&'b self, e: &Edge) -> dot::LabelText<'b> {
                dot::LabelText::label(format!("{:#x}", e.2))
            }
        }

        impl<'a> dot::GraphWalk<'a, Node, Edge> for Graph<'a> {
            fn nodes(&'a self) -> dot::Nodes<'a, Node> {
                self.nodes.clone().into()
            }
            fn edges(&'a self) -> dot::Edges<'a, Edge> {
                self.edges.clone().into()
            }
            fn source(&self, e: &Edge) -> Node {
                e.0
            }
            fn target(&self, e: &Edge) -> Node {
                e.1
            }
        }

        let mut nodes = std::collections::BTreeSet::new();
        let mut edges = vec![];
        for (insn_address, (data_var, site)) in self.iter() {
            let from = Node::Function(site.function_start);
            let to = Node::Data(*data_var);
            nodes.insert(from);
            nodes.insert(to);
            edges.push((from, to, insn_address));
        }

        let g = Graph {
            alias_set,
            nodes: nodes.into_iter().collect(),
            edges,
        };
        dot::render(&g, w)
    }

    /// Generate a `.dot` file representing these references
    pub fn generate_dot(&self, alias_set: &VariableAliasSet) -> String {
        let mut s: Vec<u8> = vec![];
        self.write_dot(alias_set, &mut s)
            .expect("Writing to a Vec cannot fail");
        String::from_utf8_lossy(&s).into_owned()
    }
}
