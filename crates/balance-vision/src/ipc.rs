use anyhow::{bail, Context, Result};
use std::{
    io::{BufRead, BufReader, ErrorKind, LineWriter, Write},
    net::{TcpListener, TcpStream},
    thread,
    time::{Duration, Instant},
};

/// A local TCP listener a child process connects back to.
pub struct IpcListener {
    host: String,
    port: u16,
    listener: TcpListener,
}

/// Line oriented writer half of an IPC connection.
pub struct IpcSender {
    writer: LineWriter<TcpStream>,
}

/// Line oriented reader half of an IPC connection.
pub struct IpcReceiver {
    reader: BufReader<TcpStream>,
}

impl IpcListener {
    /// Bind a listener on a random local port.
    pub fn new() -> Result<IpcListener> {
        let listener =
            TcpListener::bind("127.0.0.1:0").context("Failed to bind the IPC listener")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        Ok(IpcListener {
            host: addr.ip().to_string(),
            port: addr.port(),
            listener,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait until a child connects, or fail once `timeout` has passed.
    pub fn wait_for_conn(self, timeout: Duration) -> Result<(IpcSender, IpcReceiver)> {
        let start = Instant::now();
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    let reader = BufReader::new(stream.try_clone()?);
                    let writer = LineWriter::new(stream);
                    break Ok((IpcSender { writer }, IpcReceiver { reader }));
                }
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        bail!("Failed to accept connection: {}", err);
                    }
                    if start.elapsed() > timeout {
                        bail!("Timeout waiting for connection");
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }
}

impl IpcSender {
    /// Send one message as a single line.
    pub fn send(&mut self, data: &str) -> Result<()> {
        self.writer.write_all(data.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl IpcReceiver {
    /// Block until a full line arrives. Fails if the peer has hung up.
    pub fn recv(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line)?;
        if read == 0 {
            bail!("Connection closed by peer");
        }
        Ok(line)
    }

    /// Bound how long [`IpcReceiver::recv`] may block.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }
}
