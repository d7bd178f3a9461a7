//! Error types for terrain meshing with rich diagnostics.
//!
//! Every failure the pipeline can raise maps onto one of five classes
//! (see [`ErrorKind`]):
//!
//! - **Configuration**: a parameter the caller supplied cannot be used
//! - **Input**: the point cloud is unreadable or lacks required fields
//! - **InsufficientData**: too few points survive a stage to continue
//! - **EmptyMesh**: triangulation produced no faces
//! - **OutOfMemory**: a point or index buffer could not be allocated
//!
//! Writing the output mesh can additionally fail with [`TerrainError::IoWrite`].
//!
//! # Error Codes
//!
//! Each error has a code in the format `TERRAIN-XXXX`:
//! - `TERRAIN-1xxx`: configuration errors
//! - `TERRAIN-2xxx`: input errors (reading, parsing, field layout)
//! - `TERRAIN-3xxx`: reconstruction errors (not enough data, empty mesh)
//! - `TERRAIN-4xxx`: resource errors
//! - `TERRAIN-5xxx`: output errors
//!
//! # Example
//!
//! ```
//! use mesh_terrain::{ErrorKind, TerrainError};
//!
//! let err = TerrainError::missing_field("position", "x, y, z");
//! assert_eq!(err.code().as_str(), "TERRAIN-2003");
//! assert_eq!(err.kind(), ErrorKind::Input);
//! ```

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for terrain meshing operations.
pub type TerrainResult<T> = Result<T, TerrainError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Configuration (1xxx)
    /// TERRAIN-1001: Invalid or unusable parameter
    Configuration = 1001,

    // Input (2xxx)
    /// TERRAIN-2001: Failed to read the point cloud
    IoRead = 2001,
    /// TERRAIN-2002: Point cloud file could not be parsed
    ParseError = 2002,
    /// TERRAIN-2003: A required point field is missing
    MissingField = 2003,
    /// TERRAIN-2004: A point field has an unsupported numeric width
    UnsupportedFieldWidth = 2004,

    // Reconstruction (3xxx)
    /// TERRAIN-3001: Too few points to continue
    InsufficientData = 3001,
    /// TERRAIN-3002: Triangulation produced no faces
    EmptyMesh = 3002,

    // Resources (4xxx)
    /// TERRAIN-4001: Buffer allocation failed
    OutOfMemory = 4001,

    // Output (5xxx)
    /// TERRAIN-5001: Failed to write the mesh
    IoWrite = 5001,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `TERRAIN-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Configuration => "TERRAIN-1001",
            ErrorCode::IoRead => "TERRAIN-2001",
            ErrorCode::ParseError => "TERRAIN-2002",
            ErrorCode::MissingField => "TERRAIN-2003",
            ErrorCode::UnsupportedFieldWidth => "TERRAIN-2004",
            ErrorCode::InsufficientData => "TERRAIN-3001",
            ErrorCode::EmptyMesh => "TERRAIN-3002",
            ErrorCode::OutOfMemory => "TERRAIN-4001",
            ErrorCode::IoWrite => "TERRAIN-5001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse classification of a [`TerrainError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or missing parameter.
    Configuration,
    /// Missing or incompatible point-cloud fields, unreadable file.
    Input,
    /// Too few points survived a stage.
    InsufficientData,
    /// Triangulation yielded zero faces.
    EmptyMesh,
    /// Allocation failure for point or index buffers.
    OutOfMemory,
    /// The mesh could not be persisted.
    Output,
}

/// Recovery suggestions for terrain meshing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Check the input file itself.
    CheckInputFile { checks: Vec<String> },
    /// Re-export the point cloud including the listed fields.
    ReexportPointCloud { fields: Vec<String> },
    /// Adjust parameters for the run.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Manual intervention may be required.
    ManualIntervention { description: String },
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::CheckInputFile { checks } => {
                write!(f, "Check the input for: {}", checks.join(", "))
            }
            RecoverySuggestion::ReexportPointCloud { fields } => {
                write!(
                    f,
                    "Re-export the point cloud with these fields: {}",
                    fields.join(", ")
                )
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::ManualIntervention { description } => {
                write!(f, "{}", description)
            }
            RecoverySuggestion::None => write!(f, "No automatic recovery available"),
        }
    }
}

/// Errors that can occur while building a terrain mesh.
#[derive(Debug, Error, Diagnostic)]
pub enum TerrainError {
    /// A parameter could not be used.
    #[error("invalid configuration: {details}")]
    #[diagnostic(
        code(terrain::config::invalid),
        help("Run `mesh25d build --help` to see accepted options and their ranges.")
    )]
    Configuration { details: String },

    /// Error reading the point cloud.
    #[error("failed to read point cloud from {path}")]
    #[diagnostic(
        code(terrain::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The point cloud file is malformed.
    #[error("failed to parse point cloud from {path}: {details}")]
    #[diagnostic(
        code(terrain::io::parse),
        help("The file may be truncated or not a PLY point cloud.")
    )]
    Parse { path: PathBuf, details: String },

    /// A required field is absent from the point records.
    #[error("{field} attributes ({expected}) missing from input")]
    #[diagnostic(
        code(terrain::input::missing_field),
        help("Point clouds must carry positions and normals. Re-export with normals enabled.")
    )]
    MissingField {
        field: &'static str,
        expected: &'static str,
    },

    /// A field is stored with a numeric width the pipeline cannot read.
    #[error("only float and float64 types are supported for {field} information (found {width})")]
    #[diagnostic(
        code(terrain::input::field_width),
        help("Convert the point cloud so that {} is stored as float or double.", field)
    )]
    UnsupportedFieldWidth { field: &'static str, width: String },

    /// Too few points survived a stage.
    #[error("not enough points after {stage}: need at least {required}, have {actual}")]
    #[diagnostic(
        code(terrain::reconstruct::insufficient),
        help("Raise --max-vertex-count or check that the input contains ground points.")
    )]
    InsufficientData {
        stage: &'static str,
        required: usize,
        actual: usize,
    },

    /// Triangulation produced zero faces.
    #[error("no triangles in resulting mesh: {details}")]
    #[diagnostic(
        code(terrain::reconstruct::empty),
        help("The surviving points are probably colinear or coincident in plan view.")
    )]
    EmptyMesh { details: String },

    /// A buffer could not be reserved.
    #[error("not enough memory for {what} ({requested} elements)")]
    #[diagnostic(
        code(terrain::resource::oom),
        help("Lower --max-vertex-count or split the input point cloud.")
    )]
    OutOfMemory { what: &'static str, requested: usize },

    /// Error writing the output mesh.
    #[error("failed to write mesh to {path}")]
    #[diagnostic(
        code(terrain::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TerrainError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            TerrainError::Configuration { .. } => ErrorCode::Configuration,
            TerrainError::IoRead { .. } => ErrorCode::IoRead,
            TerrainError::Parse { .. } => ErrorCode::ParseError,
            TerrainError::MissingField { .. } => ErrorCode::MissingField,
            TerrainError::UnsupportedFieldWidth { .. } => ErrorCode::UnsupportedFieldWidth,
            TerrainError::InsufficientData { .. } => ErrorCode::InsufficientData,
            TerrainError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            TerrainError::OutOfMemory { .. } => ErrorCode::OutOfMemory,
            TerrainError::IoWrite { .. } => ErrorCode::IoWrite,
        }
    }

    /// Returns the error class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TerrainError::Configuration { .. } => ErrorKind::Configuration,
            TerrainError::IoRead { .. }
            | TerrainError::Parse { .. }
            | TerrainError::MissingField { .. }
            | TerrainError::UnsupportedFieldWidth { .. } => ErrorKind::Input,
            TerrainError::InsufficientData { .. } => ErrorKind::InsufficientData,
            TerrainError::EmptyMesh { .. } => ErrorKind::EmptyMesh,
            TerrainError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            TerrainError::IoWrite { .. } => ErrorKind::Output,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            TerrainError::Configuration { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![
                    ("max_vertex_count".into(), ">= 3".into()),
                    ("wlop_iterations".into(), "1..=1000".into()),
                ],
            },
            TerrainError::IoRead { .. } => RecoverySuggestion::CheckInputFile {
                checks: vec!["file exists".into(), "file permissions".into()],
            },
            TerrainError::Parse { .. } => RecoverySuggestion::CheckInputFile {
                checks: vec!["valid PLY header".into(), "complete payload".into()],
            },
            TerrainError::MissingField { field, .. } => RecoverySuggestion::ReexportPointCloud {
                fields: vec![(*field).to_string()],
            },
            TerrainError::UnsupportedFieldWidth { field, .. } => {
                RecoverySuggestion::ReexportPointCloud {
                    fields: vec![format!("{} as float/double", field)],
                }
            }
            TerrainError::InsufficientData { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("max_vertex_count".into(), "try a higher value".into())],
            },
            TerrainError::EmptyMesh { .. } => RecoverySuggestion::CheckInputFile {
                checks: vec!["ground points span an area".into()],
            },
            TerrainError::OutOfMemory { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("max_vertex_count".into(), "try a lower value".into())],
            },
            TerrainError::IoWrite { .. } => RecoverySuggestion::ManualIntervention {
                description: "Check that the output directory exists and is writable".into(),
            },
        }
    }

    /// Path of the file involved, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            TerrainError::IoRead { path, .. }
            | TerrainError::Parse { path, .. }
            | TerrainError::IoWrite { path, .. } => Some(path),
            _ => None,
        }
    }

    // Constructor helpers for common error patterns

    /// Create a Configuration error.
    pub fn configuration(details: impl Into<String>) -> Self {
        TerrainError::Configuration {
            details: details.into(),
        }
    }

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TerrainError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TerrainError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a Parse error.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        TerrainError::Parse {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create a MissingField error.
    pub fn missing_field(field: &'static str, expected: &'static str) -> Self {
        TerrainError::MissingField { field, expected }
    }

    /// Create an UnsupportedFieldWidth error.
    pub fn unsupported_width(field: &'static str, width: impl std::fmt::Display) -> Self {
        TerrainError::UnsupportedFieldWidth {
            field,
            width: width.to_string(),
        }
    }

    /// Create an InsufficientData error.
    pub fn insufficient_data(stage: &'static str, required: usize, actual: usize) -> Self {
        TerrainError::InsufficientData {
            stage,
            required,
            actual,
        }
    }

    /// Create an EmptyMesh error.
    pub fn empty_mesh(details: impl Into<String>) -> Self {
        TerrainError::EmptyMesh {
            details: details.into(),
        }
    }

    /// Create an OutOfMemory error.
    pub fn out_of_memory(what: &'static str, requested: usize) -> Self {
        TerrainError::OutOfMemory { what, requested }
    }
}

/// Reserve `additional` slots in `buf`, mapping allocation failure to
/// [`TerrainError::OutOfMemory`].
pub(crate) fn try_reserve<T>(
    buf: &mut Vec<T>,
    additional: usize,
    what: &'static str,
) -> TerrainResult<()> {
    buf.try_reserve(additional)
        .map_err(|_| TerrainError::out_of_memory(what, additional))
}
