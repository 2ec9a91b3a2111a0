//! Per-compilation source bookkeeping
//!
//! The [`SourceMap`] maps file ids to file names and contents so diagnostics
//! can render `path:line:col` without touching the filesystem again. A
//! [`Compilation`] owns the session state and is threaded through the
//! pipeline as an explicit reference; nothing here is global.

pub type FileId = u32;

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, text: impl Into<String>) -> FileId {
        let id = self.files.len() as FileId;
        self.files.push(SourceFile { name: name.into(), text: text.into() });
        id
    }

    pub fn name(&self, id: FileId) -> &str {
        self.files
            .get(id as usize)
            .map(|f| f.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn text(&self, id: FileId) -> &str {
        self.files.get(id as usize).map(|f| f.text.as_str()).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// State owned for the duration of one compilation.
#[derive(Debug, Default)]
pub struct Compilation {
    pub sources: SourceMap,
}

impl Compilation {
    pub fn new() -> Self {
        Self::default()
    }
}
