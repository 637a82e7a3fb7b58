use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use rayon::prelude::*;
use tracing::{debug, trace, warn};

use super::error::Result;
use super::header::{Callback, Header};
use super::instruction::{BranchTargets, Instruction, InstructionDecoder, Label};
use super::method::{Method, MethodArena};
use super::page::{Page, PageCallback};
use super::section::Section;

/// A known function start and the name it is declared under.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntryPoint {
    pub offset: usize,
    pub name: String,
}

/// Collects the entry points declared by sections, page callbacks and installer callbacks, in
/// that order.
pub fn entry_points(sections: &[Section], pages: &[Page], header: &Header) -> Vec<EntryPoint> {
    let sections = sections.iter().enumerate().filter_map(|(index, section)| {
        section.code_offset().map(|offset| EntryPoint {
            offset,
            name: section.function_name(index),
        })
    });

    let pages = pages.iter().enumerate().flat_map(|(index, page)| {
        PageCallback::ALL.into_iter().filter_map(move |callback| {
            page.callback_offset(callback).map(|offset| EntryPoint {
                offset,
                name: Page::function_name(index, callback),
            })
        })
    });

    let callbacks = Callback::ALL.into_iter().filter_map(|callback| {
        header.callback(callback).map(|entry| EntryPoint {
            offset: entry as usize * Instruction::SIZE,
            name: callback.function_name().to_owned(),
        })
    });

    sections.chain(pages).chain(callbacks).collect()
}

/// Name given to functions that are only reached through `Call`.
fn anonymous_name(offset: usize) -> String {
    format!("sub_{offset:#x}")
}

/// Registers every call target as a method. Jumps are accepted unconditionally since method
/// boundaries are not known yet.
struct CallHarvester<'arena> {
    methods: &'arena mut MethodArena,
    entries_len: usize,
}

impl BranchTargets for CallHarvester<'_> {
    fn call(&mut self, offset: usize) -> String {
        if offset < self.entries_len {
            self.methods.intern(offset, || anonymous_name(offset)).to_owned()
        } else {
            warn!(offset, "Call target lies past the entries block");
            anonymous_name(offset)
        }
    }

    fn label(&mut self, _offset: usize) -> bool {
        true
    }
}

/// Collects the labels of one method against the frozen method names.
struct LabelCollector<'names> {
    range: Range<usize>,
    names: &'names BTreeMap<usize, String>,
    labels: BTreeSet<Label>,
}

impl BranchTargets for LabelCollector<'_> {
    fn call(&mut self, offset: usize) -> String {
        self.names
            .get(&offset)
            .cloned()
            .unwrap_or_else(|| anonymous_name(offset))
    }

    fn label(&mut self, offset: usize) -> bool {
        let inside = self.range.contains(&offset);
        if inside {
            self.labels.insert(Label(offset));
        }
        inside
    }
}

/// Splits the entries block into methods and decodes each of them.
#[derive(Copy, Clone, Debug)]
pub struct Disassembler<'data> {
    decoder: InstructionDecoder<'data>,
}

impl<'data> Disassembler<'data> {
    pub const fn new(decoder: InstructionDecoder<'data>) -> Self {
        Self { decoder }
    }

    /// Discovers every method reachable from `entry_points` or through `Call`, then decodes
    /// them. Methods are returned ordered by start offset.
    pub fn disassemble(
        &self,
        entry_points: impl IntoIterator<Item = EntryPoint>,
        parallel: bool,
    ) -> Result<Vec<Method>> {
        let entries_len = self.decoder.entries().len();
        let mut arena = MethodArena::new();

        for EntryPoint { offset, name } in entry_points {
            if offset >= entries_len {
                warn!(offset, %name, "Entry point lies past the entries block");
                continue;
            }
            arena.intern(offset, || name);
        }
        let seeded = arena.len();

        self.harvest_calls(&mut arena)?;
        debug!(
            seeded,
            called = arena.len() - seeded,
            "Discovered NSIS methods"
        );

        // Code ahead of the first declared function still forms a method, so that the methods
        // partition the whole entries block.
        if entries_len > 0 {
            arena.intern(0, || anonymous_name(0));
        }

        let mut methods = arena.finalize(entries_len);
        let names = methods
            .iter()
            .map(|method| (method.start(), method.name().to_owned()))
            .collect::<BTreeMap<_, _>>();

        if parallel {
            methods
                .par_iter_mut()
                .try_for_each(|method| self.decode_method(method, &names))?;
        } else {
            methods
                .iter_mut()
                .try_for_each(|method| self.decode_method(method, &names))?;
        }

        Ok(methods)
    }

    /// Decodes the whole entries block once, only to register call targets.
    fn harvest_calls(&self, arena: &mut MethodArena) -> Result<()> {
        let entries_len = self.decoder.entries().len();
        let mut harvester = CallHarvester {
            methods: arena,
            entries_len,
        };
        for offset in instruction_offsets(0..entries_len, entries_len) {
            self.decoder.decode(offset, &mut harvester)?;
        }
        Ok(())
    }

    fn decode_method(&self, method: &mut Method, names: &BTreeMap<usize, String>) -> Result<()> {
        let range = method.range()?;
        let mut collector = LabelCollector {
            range: range.clone(),
            names,
            labels: BTreeSet::new(),
        };

        let instructions = instruction_offsets(range, self.decoder.entries().len())
            .map(|offset| self.decoder.decode(offset, &mut collector))
            .collect::<Result<Vec<_>>>()?;

        trace!(
            method = method.name(),
            start = method.start(),
            instructions = instructions.len(),
            labels = collector.labels.len(),
            "Disassembled method"
        );
        method.set_body(instructions, collector.labels);
        Ok(())
    }
}

/// Offsets of the whole instructions in `range`.
fn instruction_offsets(range: Range<usize>, entries_len: usize) -> impl Iterator<Item = usize> {
    range
        .step_by(Instruction::SIZE)
        .take_while(move |offset| offset + Instruction::SIZE <= entries_len)
}
