//! Everything the pipeline needs from the front of the compiler: source
//! files, diagnostic tokens, string interning and the program tree itself.
//! Lexing and parsing happen elsewhere; [`ast::build`] stands in for the
//! parser when trees are constructed programmatically.

use std::path::PathBuf;

use crate::index::{IndexVec, simple_index};

pub mod ast;
pub mod intern;

simple_index! {
    /// Identifies a [`SourceFile`] inside a [`SourceMap`]
    pub struct SourceId;
}

impl SourceId {
    /// Source of nodes the compiler synthesizes itself (lowering labels,
    /// implicit casts, intrinsic calls)
    pub const SYNTHESIZED: SourceId = SourceId(u32::MAX);
}

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    /// 1-based line for a byte offset
    pub fn row_for_position(&self, offset: usize) -> usize {
        let end = offset.min(self.contents.len());

        self.contents.as_bytes()[..end]
            .iter()
            .filter(|&&c| c == b'\n')
            .count()
            + 1
    }

    /// 1-based column for a byte offset
    pub fn column_for_position(&self, offset: usize) -> usize {
        let end = offset.min(self.contents.len());
        let line_start = self.contents.as_bytes()[..end]
            .iter()
            .rposition(|&c| c == b'\n')
            .map_or(0, |p| p + 1);

        end - line_start + 1
    }
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

#[derive(Debug, Default)]
pub struct SourceMap {
    files: IndexVec<SourceId, SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, contents: impl Into<String>, origin: SourceFileOrigin) -> SourceId {
        self.files.push(SourceFile {
            contents: contents.into(),
            origin,
        })
    }

    pub fn get(&self, id: SourceId) -> Option<&SourceFile> {
        if id == SourceId::SYNTHESIZED {
            return None;
        }

        self.files.get(id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// A source location: the file a node came from plus a linear byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    pub source: SourceId,
    pub offset: usize,
}

impl Token {
    pub const SYNTHESIZED: Token = Token {
        source: SourceId::SYNTHESIZED,
        offset: 0,
    };

    pub fn new(source: SourceId, offset: usize) -> Self {
        Self { source, offset }
    }

    pub fn is_synthesized(&self) -> bool {
        self.source == SourceId::SYNTHESIZED
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::SYNTHESIZED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    #[test]
    fn positions_are_one_based() {
        let file = SourceFile {
            contents: "ab\ncd\n".to_owned(),
            origin: SourceFileOrigin::Memory,
        };

        assert_eq!(file.row_for_position(0), 1);
        assert_eq!(file.column_for_position(1), 2);
        assert_eq!(file.row_for_position(4), 2);
        assert_eq!(file.column_for_position(4), 2);
    }

    #[test]
    fn synthesized_source_is_never_mapped() {
        let mut map = SourceMap::new();
        let id = map.add("x", SourceFileOrigin::Memory);

        assert!(map.get(id).is_some());
        assert!(map.get(SourceId::SYNTHESIZED).is_none());
        assert_eq!(SourceId::new(0), id);
    }
}
