// Kernel error handling and errno definitions

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    EPERM = 1,      // Operation not permitted
    ENOENT = 2,     // No such file or directory
    EINTR = 4,      // Interrupted system call
    EIO = 5,        // I/O error
    EBADF = 9,      // Bad file descriptor
    EAGAIN = 11,    // Try again / Would block
    ENOMEM = 12,    // Out of memory
    EFAULT = 14,    // Bad address
    EBUSY = 16,     // Device or resource busy
    EEXIST = 17,    // File exists
    ENODEV = 19,    // No such device
    ENOTDIR = 20,   // Not a directory
    EISDIR = 21,    // Is a directory
    EINVAL = 22,    // Invalid argument
    EMFILE = 24,    // Too many open files
    ENOTTY = 25,    // Not a typewriter
    ENOSPC = 28,    // No space left on device
    ESPIPE = 29,    // Illegal seek
    EROFS = 30,     // Read-only file system
    ENAMETOOLONG = 36, // File name too long
    ENOSYS = 38,    // Function not implemented
    ENOTEMPTY = 39, // Directory not empty
}

impl Errno {
    pub fn as_isize(self) -> isize {
        -(self as i32 as isize)
    }

    /// Get a static string description of the error
    pub fn description(self) -> &'static str {
        match self {
            Errno::EPERM => "Operation not permitted",
            Errno::ENOENT => "No such file or directory",
            Errno::EINTR => "Interrupted system call",
            Errno::EIO => "I/O error",
            Errno::EBADF => "Bad file descriptor",
            Errno::EAGAIN => "Try again",
            Errno::ENOMEM => "Out of memory",
            Errno::EFAULT => "Bad address",
            Errno::EBUSY => "Device or resource busy",
            Errno::EEXIST => "File exists",
            Errno::ENODEV => "No such device",
            Errno::ENOTDIR => "Not a directory",
            Errno::EISDIR => "Is a directory",
            Errno::EINVAL => "Invalid argument",
            Errno::EMFILE => "Too many open files",
            Errno::ENOTTY => "Not a typewriter",
            Errno::ENOSPC => "No space left on device",
            Errno::ESPIPE => "Illegal seek",
            Errno::EROFS => "Read-only file system",
            Errno::ENAMETOOLONG => "File name too long",
            Errno::ENOSYS => "Function not implemented",
            Errno::ENOTEMPTY => "Directory not empty",
        }
    }

    /// Convert a negated errno value (e.g., -2) to an Errno variant
    pub fn from_negated_i32(value: i32) -> Self {
        match -value {
            1 => Errno::EPERM,
            2 => Errno::ENOENT,
            4 => Errno::EINTR,
            5 => Errno::EIO,
            9 => Errno::EBADF,
            11 => Errno::EAGAIN,
            12 => Errno::ENOMEM,
            14 => Errno::EFAULT,
            16 => Errno::EBUSY,
            17 => Errno::EEXIST,
            19 => Errno::ENODEV,
            20 => Errno::ENOTDIR,
            21 => Errno::EISDIR,
            22 => Errno::EINVAL,
            24 => Errno::EMFILE,
            25 => Errno::ENOTTY,
            28 => Errno::ENOSPC,
            29 => Errno::ESPIPE,
            30 => Errno::EROFS,
            36 => Errno::ENAMETOOLONG,
            38 => Errno::ENOSYS,
            39 => Errno::ENOTEMPTY,
            _ => Errno::EINVAL, // Default to EINVAL for unknown values
        }
    }
}

pub type Result<T> = core::result::Result<T, Errno>;
