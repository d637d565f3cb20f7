//! Serial device session.
//!
//! [`DeviceSession`] owns the file descriptor of one receiver and tracks its
//! [`ConnectionState`]. Reads are driven through tokio's [`AsyncFd`] so the
//! supervisor can cancel a pending read the moment a stop is requested.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use nix::errno::Errno;
use nix::sys::termios::{self, BaudRate, ControlFlags, SetArg};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use monitor_core::error::DeviceError;
use monitor_core::models::{ConnectionState, Reading};

use crate::ubx::{self, FrameDecoder, MonHw, CLASS_MON, ID_MON_HW};
use crate::Device;

const READ_CHUNK: usize = 512;

// ── SerialPort ────────────────────────────────────────────────────────────────

/// Non-blocking handle on a character device.
struct SerialPort {
    fd: AsyncFd<File>,
}

impl SerialPort {
    fn open(path: &Path, baud_rate: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)?;
        configure_line(&file, baud_rate)?;
        let fd = AsyncFd::with_interest(file, Interest::READABLE | Interest::WRITABLE)?;
        Ok(Self { fd })
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn write_all(&self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| inner.get_ref().write(bytes)) {
                Ok(Ok(0)) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(Ok(n)) => bytes = &bytes[n..],
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }
}

/// Put the line into raw mode at `baud_rate`.
///
/// Non-terminal nodes (FIFOs, simulators) are accepted as-is.
fn configure_line(file: &File, baud_rate: u32) -> io::Result<()> {
    let mut attrs = match termios::tcgetattr(file) {
        Ok(attrs) => attrs,
        Err(Errno::ENOTTY) => {
            tracing::debug!("device is not a terminal; skipping line configuration");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    termios::cfmakeraw(&mut attrs);
    attrs.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
    termios::cfsetspeed(&mut attrs, to_baud(baud_rate)?)?;
    termios::tcsetattr(file, SetArg::TCSANOW, &attrs)?;
    Ok(())
}

fn to_baud(rate: u32) -> io::Result<BaudRate> {
    let baud = match rate {
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460800 => BaudRate::B460800,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921600 => BaudRate::B921600,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate {other}"),
            ))
        }
    };
    Ok(baud)
}

// ── DeviceSession ─────────────────────────────────────────────────────────────

/// One receiver connection, re-acquirable until closed.
pub struct DeviceSession {
    path: PathBuf,
    baud_rate: u32,
    state: ConnectionState,
    port: Option<SerialPort>,
    decoder: FrameDecoder,
}

impl DeviceSession {
    /// Create a session; nothing is opened until [`Device::acquire`].
    pub fn new(path: impl Into<PathBuf>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            state: ConnectionState::Disconnected,
            port: None,
            decoder: FrameDecoder::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "device state");
            self.state = next;
        }
    }

    /// Drop the handle after a transport failure and report it.
    fn lose(&mut self, reason: String) -> DeviceError {
        tracing::warn!(path = %self.path.display(), %reason, "lost connection to device");
        self.port = None;
        self.decoder.clear();
        self.set_state(ConnectionState::Disconnected);
        DeviceError::ConnectionLost(reason)
    }

    fn unavailable(&mut self, source: io::Error) -> DeviceError {
        self.port = None;
        self.set_state(ConnectionState::Disconnected);
        DeviceError::Unavailable {
            path: self.path.clone(),
            source,
        }
    }
}

impl Device for DeviceSession {
    async fn acquire(&mut self) -> Result<(), DeviceError> {
        match self.state {
            ConnectionState::Closed => return Err(DeviceError::Closed),
            ConnectionState::Streaming if self.port.is_some() => return Ok(()),
            _ => {}
        }

        self.set_state(ConnectionState::Connecting);
        let port = match SerialPort::open(&self.path, self.baud_rate) {
            Ok(port) => port,
            Err(e) => return Err(self.unavailable(e)),
        };

        // Ask the receiver for one MON-HW report per navigation epoch.
        let enable = ubx::cfg_msg_rate(CLASS_MON, ID_MON_HW, 1);
        if let Err(e) = port.write_all(&enable).await {
            return Err(self.unavailable(e));
        }

        self.decoder.clear();
        self.port = Some(port);
        self.set_state(ConnectionState::Streaming);
        tracing::info!(
            path = %self.path.display(),
            baud_rate = self.baud_rate,
            "device session streaming"
        );
        Ok(())
    }

    async fn next_reading(&mut self) -> Result<Reading, DeviceError> {
        match self.state {
            ConnectionState::Closed => return Err(DeviceError::Closed),
            ConnectionState::Streaming => {}
            other => {
                return Err(DeviceError::ConnectionLost(format!("session is {other}")));
            }
        }

        loop {
            while let Some(frame) = self.decoder.next_frame() {
                if frame.is(CLASS_MON, ID_MON_HW) {
                    let hw = MonHw::parse(&frame.payload)?;
                    return Ok(Reading::new(Utc::now(), hw.jam_ind, Some(hw.flags)));
                }
                tracing::trace!(class = frame.class, id = frame.id, "ignoring UBX frame");
            }

            let Some(port) = self.port.as_ref() else {
                return Err(self.lose("no open handle".to_string()));
            };

            let mut chunk = [0u8; READ_CHUNK];
            match port.read(&mut chunk).await {
                Ok(0) => return Err(self.lose("device closed the connection".to_string())),
                Ok(n) => self.decoder.push(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.lose(e.to_string())),
            }
        }
    }

    fn release(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.port.take().is_some() {
            tracing::debug!(path = %self.path.display(), "device handle released");
        }
        self.decoder.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.port = None;
        self.decoder.clear();
        self.set_state(ConnectionState::Closed);
        tracing::info!(path = %self.path.display(), "device session closed");
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
