/// Controls how schema documents are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfig {
    /// Maximum bytes read from a schema file.
    pub max_schema_file_size: usize,
    /// When true, the document is checked against the embedded JSON Schema
    /// before the decode table is built.
    pub validate_document: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            max_schema_file_size: 1024 * 1024,
            validate_document: true,
        }
    }
}
