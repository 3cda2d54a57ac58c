//! Module payload shapes: the borrowed view producers hand in, and the
//! owned copy the builder keeps in its queues.

use crate::clock::Ts;

/// A borrowed view of one module's readout words for a single input batch.
///
/// `prefix_size + dynamic_size + suffix_size` must equal `data.len()`; this
/// is checked by [`size_consistency_check`] before the data is copied into
/// the builder's queues.
#[derive(Debug, Clone, Copy)]
pub struct ModuleData<'a> {
    pub data: &'a [u32],
    pub prefix_size: u32,
    pub dynamic_size: u32,
    pub suffix_size: u32,
    pub has_dynamic: bool,
}

impl<'a> ModuleData<'a> {
    pub fn new(
        data: &'a [u32],
        prefix_size: u32,
        dynamic_size: u32,
        suffix_size: u32,
        has_dynamic: bool,
    ) -> Self {
        ModuleData {
            data,
            prefix_size,
            dynamic_size,
            suffix_size,
            has_dynamic,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Returns whether `module.prefix_size + module.dynamic_size +
/// module.suffix_size == module.data.len()`, and `module.dynamic_size > 0`
/// implies `module.has_dynamic`.
pub fn size_consistency_check(module: &ModuleData<'_>) -> bool {
    let declared = module.prefix_size as usize + module.dynamic_size as usize + module.suffix_size as usize;
    if declared != module.data.len() {
        return false;
    }
    if module.dynamic_size > 0 && !module.has_dynamic {
        return false;
    }
    true
}

/// An owned copy of one module's readout words, as kept in the builder's
/// per-module FIFOs, plus the extracted and offset-adjusted timestamp (if
/// any was produced for this entry).
#[derive(Debug, Clone)]
pub struct ModuleStorage {
    pub data: Vec<u32>,
    pub prefix_size: u32,
    pub dynamic_size: u32,
    pub suffix_size: u32,
    pub has_dynamic: bool,
    pub timestamp: Option<Ts>,
}

impl ModuleStorage {
    pub fn from_module_data(module: &ModuleData<'_>, timestamp: Option<Ts>) -> Self {
        ModuleStorage {
            data: module.data.to_vec(),
            prefix_size: module.prefix_size,
            dynamic_size: module.dynamic_size,
            suffix_size: module.suffix_size,
            has_dynamic: module.has_dynamic,
            timestamp,
        }
    }

    /// An empty, zero-filled placeholder slot for a module that did not
    /// contribute to the current output event.
    pub fn placeholder(prefix_size: u32, has_dynamic: bool) -> Self {
        ModuleStorage {
            data: vec![0; prefix_size as usize],
            prefix_size,
            dynamic_size: 0,
            suffix_size: 0,
            has_dynamic,
            timestamp: None,
        }
    }

    /// Number of bytes this entry occupies in the builder's memory
    /// accounting: word count times four.
    pub fn mem_bytes(&self) -> usize {
        self.data.len() * 4
    }
}
