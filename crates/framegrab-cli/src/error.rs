// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Capture device not found or inaccessible
    DeviceNotFound(String),
    /// Device lacks a required capability or i/o method
    Unsupported(String),
    /// Operation timed out
    Timeout(String),
    /// General error from the framegrab library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CliError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::InvalidArgs(_) => ExitCode::from(2),
            CliError::DeviceNotFound(_) => ExitCode::from(3),
            CliError::Unsupported(_) => ExitCode::from(4),
            CliError::Timeout(_) => ExitCode::from(6),
            CliError::General(_) => ExitCode::from(1),
        }
    }
}

/// Map framegrab::Error to CliError with appropriate exit codes
impl From<framegrab::Error> for CliError {
    fn from(err: framegrab::Error) -> Self {
        use framegrab::Error;

        match err {
            // Missing or inaccessible device nodes
            Error::NotADevice(path) => {
                CliError::DeviceNotFound(format!("{} is not a device node", path.display()))
            }
            Error::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound => {
                    CliError::DeviceNotFound(format!("Device not found: {}", io_err))
                }
                std::io::ErrorKind::PermissionDenied => {
                    CliError::DeviceNotFound(format!("Permission denied: {}", io_err))
                }
                _ => CliError::General(format!("I/O error: {}", io_err)),
            },
            Error::Ioctl { op, source }
                if matches!(
                    source.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                ) =>
            {
                CliError::DeviceNotFound(format!("{}: {}", op, source))
            }

            // Capability and i/o method mismatches
            err @ (Error::NotV4l2Device(_)
            | Error::NotCaptureDevice(_)
            | Error::MethodUnsupported { .. }
            | Error::InsufficientBuffers { .. }) => CliError::Unsupported(err.to_string()),

            // A wedged device that never became readable
            err @ Error::WaitTimeout(_) => CliError::Timeout(err.to_string()),

            err => CliError::General(err.to_string()),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CliError::InvalidArgs("test".into()).exit_code(),
            ExitCode::from(2)
        );
        assert_eq!(
            CliError::DeviceNotFound("test".into()).exit_code(),
            ExitCode::from(3)
        );
        assert_eq!(
            CliError::Unsupported("test".into()).exit_code(),
            ExitCode::from(4)
        );
        assert_eq!(
            CliError::Timeout("test".into()).exit_code(),
            ExitCode::from(6)
        );
        assert_eq!(
            CliError::General("test".into()).exit_code(),
            ExitCode::from(1)
        );
    }

    #[test]
    fn test_error_display() {
        let err = CliError::DeviceNotFound("/dev/video0".to_string());
        assert_eq!(format!("{}", err), "Device not found: /dev/video0");
    }

    #[test]
    fn test_missing_device_maps_from_library() {
        let err = CliError::from(framegrab::Error::Ioctl {
            op: "stat",
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert!(matches!(err, CliError::DeviceNotFound(_)));
        assert_eq!(err.exit_code(), ExitCode::from(3));
    }

    #[test]
    fn test_timeout_maps_from_library() {
        let err = CliError::from(framegrab::Error::WaitTimeout("/dev/video0".into()));
        assert!(matches!(err, CliError::Timeout(_)));
        assert_eq!(err.exit_code(), ExitCode::from(6));
    }
}
