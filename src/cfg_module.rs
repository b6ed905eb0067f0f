//! The CFG module handed to the downstream lifter, and its protobuf wire encoding
//!
//! Only the part of the module schema that describes global variables is produced:
//!
//! ```text
//! message Module { string name = 1; repeated GlobalVariable global_vars = 6; }
//! message GlobalVariable { uint64 ea = 1; string name = 2; uint64 size = 3; }
//! ```

use std::path::Path;

use crate::alias::VariableAliasSet;
use crate::error::Error;
use crate::log::*;

/// A recovered global variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVariable {
    pub ea: u64,
    pub name: String,
    /// Size in bytes; `0` if unknown
    pub size: u64,
}

impl GlobalVariable {
    pub fn new(ea: u64, size: u64) -> Self {
        Self {
            ea,
            name: format!("global_var_{:x}", ea),
            size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    /// Ascending by address
    pub global_vars: Vec<GlobalVariable>,
}

impl Module {
    /// Flatten the alias table into a module, sizing every variable up to the next known start.
    pub fn from_alias_table(name: impl Into<String>, alias_set: &VariableAliasSet) -> Self {
        Self {
            name: name.into(),
            global_vars: alias_set
                .sized_variables()
                .into_iter()
                .map(|(ea, size)| GlobalVariable::new(ea, size))
                .collect(),
        }
    }

    /// The protobuf wire encoding of the module
    pub fn encode(&self) -> Vec<u8> {
        let mut res = vec![];
        write_bytes_field(&mut res, 1, self.name.as_bytes());
        for var in &self.global_vars {
            write_bytes_field(&mut res, 6, &var.encode());
        }
        res
    }

    /// Encode the module and write it to `path`
    pub fn write_to(&self, path: &Path) -> Result<(), Error> {
        let encoded = self.encode();
        std::fs::write(path, &encoded).map_err(|e| Error::io(path, e))?;
        info!(
            "Wrote module";
            "path" => %path.display(),
            "global_vars" => self.global_vars.len(),
            "bytes" => encoded.len(),
        );
        Ok(())
    }
}

impl GlobalVariable {
    fn encode(&self) -> Vec<u8> {
        let mut res = vec![];
        write_varint_field(&mut res, 1, self.ea);
        write_bytes_field(&mut res, 2, self.name.as_bytes());
        write_varint_field(&mut res, 3, self.size);
        res
    }
}

const WIRE_TYPE_VARINT: u64 = 0;
const WIRE_TYPE_LENGTH_DELIMITED: u64 = 2;

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

fn write_varint_field(out: &mut Vec<u8>, field: u64, v: u64) {
    write_varint(out, field << 3 | WIRE_TYPE_VARINT);
    write_varint(out, v);
}

fn write_bytes_field(out: &mut Vec<u8>, field: u64, bytes: &[u8]) {
    write_varint(out, field << 3 | WIRE_TYPE_LENGTH_DELIMITED);
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}
