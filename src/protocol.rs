//! Shared protocol constants for the BitDrive session transport

// Protocol header constants
pub const MAGIC: &[u8; 4] = b"BDRV";
pub const VERSION: u16 = 1;

/// Control frame header: MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)
pub const FRAME_HEADER_LEN: usize = 11;

// Maximum control frame payload size (16MB). Listings are the only large frames.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Width of the zero-padded decimal length header that opens every transfer.
pub const LENGTH_HEADER_LEN: usize = 256;

/// Default payload window for chunked transfers.
pub const DEFAULT_WINDOW_SIZE: usize = 256;

/// Upper bound accepted for a configured window.
pub const MAX_WINDOW_SIZE: usize = 4 * 1024 * 1024;

/// Longest filename accepted on the wire. The in-flight temp name adds 15
/// bytes and must stay within the usual 255-byte filesystem limit.
pub const MAX_FILENAME_LEN: usize = 240;

// Frame type IDs
pub mod frame {
    pub const TOKEN: u8 = 1;
    pub const FILENAME: u8 = 2;
    pub const LISTING: u8 = 3;

    pub fn name(t: u8) -> &'static str {
        match t {
            TOKEN => "TOKEN",
            FILENAME => "FILENAME",
            LISTING => "LISTING",
            _ => "UNKNOWN",
        }
    }
}

// Command and reply tokens. Comparison is always exact.
pub mod token {
    // Connection greeting
    pub const WELCOME: &str = "welcome";
    pub const SERVER_BUSY: &str = "server_busy";

    // Commands (client -> server)
    pub const LIST: &str = "LIST";
    pub const UPLOAD: &str = "UPLOAD";
    pub const DOWNLOAD: &str = "DOWNLOAD";
    pub const DELETE: &str = "DELETE";
    pub const QUIT: &str = "QUIT";

    // LIST
    pub const FILE_COUNT_RECEIVED: &str = "file_count_received";

    // UPLOAD
    pub const READY_UPLOAD: &str = "ready_upload";
    pub const READY_FILENAME: &str = "ready_filename";

    // DOWNLOAD
    pub const READY_DOWNLOAD: &str = "ready_download";
    pub const READY_TO_SEND: &str = "ready_to_send";
    pub const READY_TO_RECEIVE: &str = "ready_to_receive";
    pub const RECEIVE_ERROR: &str = "receive_error";

    // Shared by UPLOAD and DOWNLOAD
    pub const FILENAME_ERROR: &str = "filename_error";

    // DELETE
    pub const READY_DELETE: &str = "ready_delete";
    pub const DELETE_SUCCESS: &str = "delete_success";
    pub const DELETE_ERROR: &str = "delete_error";

    // QUIT
    pub const DISCONNECTING: &str = "Disconnecting...";

    pub const INVALID_INPUT: &str = "Invalid input. Please try again.";
}

// Centralized timeout defaults
pub mod timeouts {
    /// How long a session may sit idle between commands (s)
    pub const IDLE_SECS: u64 = 600;

    /// Deadline for every handshake step and transfer window (s)
    pub const IO_SECS: u64 = 30;

    /// Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;
}
