use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use super::error::{NsisError, Result};
use super::instruction::{Instruction, Label};

/// A function recovered from the entries block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Method {
    name: String,
    start: usize,
    end: Option<usize>,
    labels: BTreeSet<Label>,
    instructions: Vec<Instruction>,
}

impl Method {
    pub(super) const fn new(name: String, start: usize) -> Self {
        Self {
            name,
            start,
            end: None,
            labels: BTreeSet::new(),
            instructions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte offset of the first instruction within the entries block.
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Byte offset one past the last instruction.
    ///
    /// Fails with [`NsisError::MethodEndUnresolved`] until every method has been discovered.
    pub fn end(&self) -> Result<usize> {
        self.end.ok_or(NsisError::MethodEndUnresolved(self.start))
    }

    pub fn range(&self) -> Result<Range<usize>> {
        Ok(self.start..self.end()?)
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.end.is_some_and(|end| (self.start..end).contains(&offset))
    }

    pub const fn labels(&self) -> &BTreeSet<Label> {
        &self.labels
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub(super) fn set_body(&mut self, instructions: Vec<Instruction>, labels: BTreeSet<Label>) {
        self.instructions = instructions;
        self.labels = labels;
    }
}

/// Every method of an installer keyed by start offset. A start offset is only ever registered
/// once, so the first name given to it sticks.
#[derive(Debug, Default)]
pub struct MethodArena {
    methods: BTreeMap<usize, Method>,
}

impl MethodArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the name of the method starting at `start`, creating it with `name` if it is new.
    pub fn intern(&mut self, start: usize, name: impl FnOnce() -> String) -> &str {
        &self
            .methods
            .entry(start)
            .or_insert_with(|| Method::new(name(), start))
            .name
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Fixes every method's end at the next method's start, and the last one at `entries_len`.
    ///
    /// Returns the methods ordered by start offset.
    pub fn finalize(self, entries_len: usize) -> Vec<Method> {
        let mut methods = self.methods.into_values().collect::<Vec<_>>();
        let ends = methods
            .iter()
            .skip(1)
            .map(Method::start)
            .chain(std::iter::once(entries_len))
            .collect::<Vec<_>>();
        for (method, end) in methods.iter_mut().zip(ends) {
            method.end = Some(end);
        }
        methods
    }
}
