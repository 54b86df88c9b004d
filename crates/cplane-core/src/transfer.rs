//! File-transfer message types.
//!
//! Every message on an engine's file-transfer socket carries a request
//! id chosen by the client; replies echo it. A request is answered by
//! exactly one terminal reply (`Ok`, `Error`, a typed result, or
//! `FileEnd` after zero or more `FileData` chunks).
//!
//! `Ready` is sent once by the engine when the socket is usable; its
//! request id is meaningless.

/// One file-transfer envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMessage {
    pub request_id: u32,
    pub body: TransferBody,
}

impl TransferMessage {
    pub fn new(request_id: u32, body: TransferBody) -> Self {
        TransferMessage { request_id, body }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferBody {
    // ---- engine → client ----
    Ready,
    Ok,
    Error { message: String },
    DirList { entries: Vec<DirEntry> },
    StatResult(FileStat),
    RealpathResult { path: String, is_dir: bool },
    FileData { data: Vec<u8>, total_size: u64 },
    FileEnd,
    ExecResult(ExecOutput),
    SearchResult { directories: Vec<String> },

    // ---- client → engine ----
    ListDir { path: String },
    Stat { path: String },
    Mkdir { path: String },
    Unlink { path: String },
    Realpath { path: String },
    ReadFile { path: String },
    WriteBegin { path: String },
    WriteData { data: Vec<u8> },
    WriteEnd,
    Rmdir { path: String, recursive: bool },
    Rename { old_path: String, new_path: String },
    Chmod { path: String, mode: u32 },
    Exec { command: String },
    SearchDirs { search_path: String, max_results: u32 },
}

impl TransferBody {
    /// Short name of the variant, for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            TransferBody::Ready => "Ready",
            TransferBody::Ok => "Ok",
            TransferBody::Error { .. } => "Error",
            TransferBody::DirList { .. } => "DirList",
            TransferBody::StatResult(_) => "StatResult",
            TransferBody::RealpathResult { .. } => "RealpathResult",
            TransferBody::FileData { .. } => "FileData",
            TransferBody::FileEnd => "FileEnd",
            TransferBody::ExecResult(_) => "ExecResult",
            TransferBody::SearchResult { .. } => "SearchResult",
            TransferBody::ListDir { .. } => "ListDir",
            TransferBody::Stat { .. } => "Stat",
            TransferBody::Mkdir { .. } => "Mkdir",
            TransferBody::Unlink { .. } => "Unlink",
            TransferBody::Realpath { .. } => "Realpath",
            TransferBody::ReadFile { .. } => "ReadFile",
            TransferBody::WriteBegin { .. } => "WriteBegin",
            TransferBody::WriteData { .. } => "WriteData",
            TransferBody::WriteEnd => "WriteEnd",
            TransferBody::Rmdir { .. } => "Rmdir",
            TransferBody::Rename { .. } => "Rename",
            TransferBody::Chmod { .. } => "Chmod",
            TransferBody::Exec { .. } => "Exec",
            TransferBody::SearchDirs { .. } => "SearchDirs",
        }
    }
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,

    /// Modification time, Unix seconds.
    pub mtime: u64,
    pub size: u64,

    /// POSIX mode bits.
    pub mode: u32,
}

/// Result of `Stat`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: u64,
    pub mtime: u64,
    pub owner: String,
    pub group: String,
    pub is_dir: bool,
}

/// Captured output of `Exec`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}
