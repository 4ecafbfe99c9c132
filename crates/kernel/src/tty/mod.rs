//! TTY ioctl boundary.
//!
//! The console device itself (line rendering, input translation) lives
//! outside the core; what is fixed here is the ioctl surface and the
//! default line discipline state, mirroring the Linux console
//! (`TERM=linux`). Video restart/pause on mode switches is delegated to a
//! hook installed by the console driver.

use crate::error::{Errno, Result};
use spin::RwLock;

pub const TCGETS: u32 = 0x5401;
pub const TCSETS: u32 = 0x5402;
pub const TCSETSW: u32 = 0x5403;
pub const TCSETSF: u32 = 0x5404;
pub const TIOCGWINSZ: u32 = 0x5413;
pub const KDSETMODE: u32 = 0x4B3A;
pub const KDGETMODE: u32 = 0x4B3B;
pub const KDGKBMODE: u32 = 0x4B44;
pub const KDSKBMODE: u32 = 0x4B45;

pub const KD_TEXT: usize = 0x00;
pub const KD_GRAPHICS: usize = 0x01;
/// The only keyboard translation mode supported.
pub const K_XLATE: usize = 0x01;

// c_iflag
pub const ICRNL: u32 = 0o000400;
pub const IXON: u32 = 0o002000;
// c_oflag
pub const OPOST: u32 = 0o000001;
pub const ONLCR: u32 = 0o000004;
// c_cflag
pub const B38400: u32 = 0o000017;
pub const CS8: u32 = 0o000060;
pub const CREAD: u32 = 0o000200;
// c_lflag
pub const ISIG: u32 = 0o000001;
pub const ICANON: u32 = 0o000002;
pub const ECHO: u32 = 0o000010;
pub const ECHOE: u32 = 0o000020;
pub const ECHOK: u32 = 0o000040;
pub const ECHOCTL: u32 = 0o001000;
pub const ECHOKE: u32 = 0o004000;
pub const IEXTEN: u32 = 0o100000;

// Control-character slots
pub const VINTR: usize = 0;
pub const VQUIT: usize = 1;
pub const VERASE: usize = 2;
pub const VKILL: usize = 3;
pub const VEOF: usize = 4;
pub const VTIME: usize = 5;
pub const VMIN: usize = 6;
pub const VSWTC: usize = 7;
pub const VSTART: usize = 8;
pub const VSTOP: usize = 9;
pub const VSUSP: usize = 10;
pub const VEOL: usize = 11;
pub const VREPRINT: usize = 12;
pub const VDISCARD: usize = 13;
pub const VWERASE: usize = 14;
pub const VLNEXT: usize = 15;
pub const VEOL2: usize = 16;

pub const NCCS: usize = 19;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termios {
    pub c_iflag: u32,
    pub c_oflag: u32,
    pub c_cflag: u32,
    pub c_lflag: u32,
    pub c_line: u8,
    pub c_cc: [u8; NCCS],
}

impl Default for Termios {
    /// The Linux console defaults.
    fn default() -> Self {
        let mut cc = [0u8; NCCS];
        cc[VINTR] = 0x03; // ^C
        cc[VQUIT] = 0x1C; // ^\
        cc[VERASE] = 0x7F; // DEL
        cc[VKILL] = 0x15; // ^U
        cc[VEOF] = 0x04; // ^D
        cc[VTIME] = 0;
        cc[VMIN] = 1;
        cc[VSWTC] = 0;
        cc[VSTART] = 0x11; // ^Q
        cc[VSTOP] = 0x13; // ^S
        cc[VSUSP] = 0x1A; // ^Z
        cc[VEOL] = 0;
        cc[VREPRINT] = 0x12; // ^R
        cc[VDISCARD] = 0x0F; // ^O
        cc[VWERASE] = 0x17; // ^W
        cc[VLNEXT] = 0x16; // ^V
        cc[VEOL2] = 0;
        Self {
            c_iflag: ICRNL | IXON,
            c_oflag: OPOST | ONLCR,
            c_cflag: CREAD | B38400 | CS8,
            c_lflag: ISIG | ICANON | ECHO | ECHOE | ECHOK | ECHOCTL | ECHOKE | IEXTEN,
            c_line: 0,
            c_cc: cc,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Winsize {
    pub ws_row: u16,
    pub ws_col: u16,
    pub ws_xpixel: u16,
    pub ws_ypixel: u16,
}

/// Console-driver hook for KDSETMODE transitions.
pub trait VideoOps: Send + Sync {
    fn pause(&self);
    fn restart(&self);
}

struct TtyState {
    termios: Termios,
    graphics_mode: usize,
    kb_mode: usize,
}

pub struct Tty {
    state: RwLock<TtyState>,
    rows: u16,
    cols: u16,
    video: RwLock<Option<&'static dyn VideoOps>>,
}

impl Tty {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            state: RwLock::new(TtyState {
                termios: Termios::default(),
                graphics_mode: KD_TEXT,
                kb_mode: K_XLATE,
            }),
            rows,
            cols,
            video: RwLock::new(None),
        }
    }

    pub fn set_video_ops(&self, ops: &'static dyn VideoOps) {
        *self.video.write() = Some(ops);
    }

    pub fn termios(&self) -> Termios {
        self.state.read().termios
    }

    /// Replace the line discipline state. The input layer re-derives its
    /// special-character handlers from the new table.
    pub fn set_termios(&self, t: &Termios) {
        self.state.write().termios = *t;
    }

    /// Dispatch a TTY ioctl. `arg` is the user pointer (or the mode value
    /// for the KD mode requests).
    pub fn ioctl(&self, cmd: u32, arg: usize) -> Result<isize> {
        match cmd {
            TCGETS => {
                let t = self.termios();
                let user = arg as *mut Termios;
                if user.is_null() {
                    return Err(Errno::EFAULT);
                }
                unsafe { core::ptr::write(user, t) };
                Ok(0)
            }
            TCSETS | TCSETSW | TCSETSF => {
                // The drain/flush variants behave like TCSETS here: the
                // core owns no output queue to drain.
                let user = arg as *const Termios;
                if user.is_null() {
                    return Err(Errno::EFAULT);
                }
                let t = unsafe { core::ptr::read(user) };
                self.set_termios(&t);
                Ok(0)
            }
            TIOCGWINSZ => {
                let user = arg as *mut Winsize;
                if user.is_null() {
                    return Err(Errno::EFAULT);
                }
                let ws = Winsize {
                    ws_row: self.rows,
                    ws_col: self.cols,
                    ws_xpixel: 0,
                    ws_ypixel: 0,
                };
                unsafe { core::ptr::write(user, ws) };
                Ok(0)
            }
            KDSETMODE => match arg {
                KD_TEXT => {
                    self.state.write().graphics_mode = KD_TEXT;
                    if let Some(v) = *self.video.read() {
                        v.restart();
                    }
                    Ok(0)
                }
                KD_GRAPHICS => {
                    self.state.write().graphics_mode = KD_GRAPHICS;
                    if let Some(v) = *self.video.read() {
                        v.pause();
                    }
                    Ok(0)
                }
                _ => Err(Errno::EINVAL),
            },
            KDGETMODE => {
                let user = arg as *mut usize;
                if user.is_null() {
                    return Err(Errno::EFAULT);
                }
                unsafe { core::ptr::write(user, self.state.read().graphics_mode) };
                Ok(0)
            }
            KDGKBMODE => {
                let user = arg as *mut usize;
                if user.is_null() {
                    return Err(Errno::EFAULT);
                }
                unsafe { core::ptr::write(user, self.state.read().kb_mode) };
                Ok(0)
            }
            KDSKBMODE => {
                if arg != K_XLATE {
                    return Err(Errno::EINVAL);
                }
                self.state.write().kb_mode = K_XLATE;
                Ok(0)
            }
            _ => Err(Errno::EINVAL),
        }
    }
}
