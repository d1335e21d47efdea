//! Serial device endpoint.
//!
//! Opens a tty in raw, non-blocking mode: 8N1, receiver enabled, no modem
//! control, no line discipline processing, no software flow control, and
//! `VMIN = VTIME = 0` so reads return whatever is buffered.

use super::{wait_readable, Endpoint, EndpointKind};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use nix::fcntl::OFlag;
use nix::sys::termios::{
    self, ControlFlags, FlushArg, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices, Termios,
};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::fd::AsFd;
use std::path::Path;
use std::time::Duration;

/// A configured serial device.
#[derive(Debug)]
pub struct SerialEndpoint {
    file: File,
}

impl SerialEndpoint {
    /// Open and configure the device at `path`.
    ///
    /// The handle is closed again if any configuration step fails.
    pub fn open(path: &Path, baud_rate: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
            .open(path)
            .map_err(|source| Error::OpenFailed {
                path: path.display().to_string(),
                source,
            })?;

        configure(&file, baud_rate)?;

        termios::tcflush(&file, FlushArg::TCIFLUSH)
            .map_err(|e| Error::config("tcflush", e))?;

        debug!(path = %path.display(), baud_rate, "Serial line configured");
        Ok(Self { file })
    }
}

fn configure(file: &File, baud_rate: u32) -> Result<()> {
    let mut options = termios::tcgetattr(file).map_err(|e| Error::config("tcgetattr", e))?;

    make_raw(&mut options);

    #[cfg(target_os = "linux")]
    termios::cfsetspeed(&mut options, linux_baud(baud_rate)?)
        .map_err(|e| Error::config("cfsetspeed", e))?;

    termios::tcsetattr(file, SetArg::TCSANOW, &options)
        .map_err(|e| Error::config("tcsetattr", e))?;

    #[cfg(target_os = "macos")]
    macos::set_speed(file, baud_rate)?;

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    let _ = baud_rate;

    Ok(())
}

fn make_raw(options: &mut Termios) {
    options
        .control_flags
        .remove(ControlFlags::CSIZE | ControlFlags::CSTOPB | ControlFlags::PARENB);
    options
        .control_flags
        .insert(ControlFlags::CLOCAL | ControlFlags::CREAD | ControlFlags::CS8);

    options.local_flags.remove(
        LocalFlags::ICANON
            | LocalFlags::ECHO
            | LocalFlags::ECHOE
            | LocalFlags::ECHOK
            | LocalFlags::ECHONL
            | LocalFlags::ISIG
            | LocalFlags::IEXTEN,
    );

    options.output_flags.remove(OutputFlags::OPOST);

    options.input_flags.remove(
        InputFlags::IXON
            | InputFlags::IXOFF
            | InputFlags::INLCR
            | InputFlags::IGNCR
            | InputFlags::ICRNL
            | InputFlags::IGNBRK,
    );

    options.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    options.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
}

// Linux encodes speeds as B* constants rather than plain integers.
#[cfg(target_os = "linux")]
fn linux_baud(baud_rate: u32) -> Result<termios::BaudRate> {
    use termios::BaudRate::*;

    Ok(match baud_rate {
        9600 => B9600,
        19200 => B19200,
        38400 => B38400,
        57600 => B57600,
        115200 => B115200,
        230400 => B230400,
        460800 => B460800,
        500000 => B500000,
        576000 => B576000,
        921600 => B921600,
        1000000 => B1000000,
        1500000 => B1500000,
        2000000 => B2000000,
        other => {
            let msg = format!("unsupported baud rate {other}");
            return Err(Error::ConfigFailed(msg));
        }
    })
}

#[cfg(target_os = "macos")]
mod macos {
    use crate::error::{Error, Result};
    use std::fs::File;
    use std::os::fd::AsRawFd;

    // IOSSIOSPEED = _IOW('T', 2, speed_t)
    nix::ioctl_write_ptr!(iossiospeed, b'T', 2, nix::libc::speed_t);

    /// Apply an arbitrary line speed; termios alone only knows the classic rates.
    pub(super) fn set_speed(file: &File, baud_rate: u32) -> Result<()> {
        let speed = baud_rate as nix::libc::speed_t;
        // SAFETY: the descriptor is open for the lifetime of `file` and
        // `speed` outlives the call.
        unsafe { iossiospeed(file.as_raw_fd(), &speed) }
            .map_err(|e| Error::config("IOSSIOSPEED", e))?;
        Ok(())
    }
}

impl Endpoint for SerialEndpoint {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Serial
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        wait_readable(self.file.as_fd(), timeout)
    }

    // With O_NONBLOCK an empty line reads as EAGAIN, so a zero-length read
    // only happens once the line has been hung up.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match (&self.file).read(buf) {
            Ok(0) if !buf.is_empty() => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial line hung up",
            )),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            other => other,
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (&self.file).write(buf)
    }
}
