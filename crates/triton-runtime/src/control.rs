//! The control role: commands in, actuation out.
//!
//! Actuation sits behind [`CommandSink`].  The built-in [`LoggingSink`] only
//! records each command.  Control has no downstream consumer, so its output
//! endpoint is never opened.

use async_trait::async_trait;
use tokio::io::AsyncBufRead;
use tracing::{Instrument, info, info_span, warn};
use triton_middleware::{ChannelReader, Command};
use triton_types::TritonError;

use crate::shutdown::ShutdownSignal;

/// Executes one command.
#[async_trait]
pub trait CommandSink: Send {
    async fn execute(&mut self, command: &Command) -> Result<(), TritonError>;
}

/// Logs every command it is handed.
#[derive(Debug, Default)]
pub struct LoggingSink {
    executed: u64,
}

impl LoggingSink {
    pub fn executed(&self) -> u64 {
        self.executed
    }
}

#[async_trait]
impl CommandSink for LoggingSink {
    async fn execute(&mut self, command: &Command) -> Result<(), TritonError> {
        self.executed += 1;
        info!(seq = self.executed, command = command.as_str(), "command received");
        Ok(())
    }
}

/// Drives a [`CommandSink`] from the command channel.
pub struct ControlRole<S> {
    sink: S,
    commands: u64,
}

impl<S: CommandSink> ControlRole<S> {
    pub fn new(sink: S) -> Self {
        Self { sink, commands: 0 }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run until end-of-stream or shutdown; returns the number of commands
    /// executed.  A sink error ends the loop.
    pub async fn run<R>(
        &mut self,
        reader: &mut ChannelReader<R>,
        mut shutdown: ShutdownSignal,
    ) -> Result<u64, TritonError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let span = info_span!("control", input = %reader.name());
        async {
            info!("control loop started");
            loop {
                let command = tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    command = reader.read_command() => command,
                };
                match command {
                    Ok(command) => {
                        self.sink.execute(&command).await?;
                        self.commands += 1;
                    }
                    Err(TritonError::ChannelClosed(_)) => break,
                    Err(e) if e.is_recoverable() => {
                        warn!(error = %e, "skipping unreadable command line");
                    }
                    Err(e) => return Err(e),
                }
            }
            info!(commands = self.commands, "control loop finished");
            Ok::<_, TritonError>(self.commands)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader, duplex};

    #[tokio::test]
    async fn executes_each_command_line() {
        let (mut mission, input) = duplex(1024);
        let mut reader = ChannelReader::new("control-in", BufReader::new(input));
        mission.write_all(b"dive 2\n\nsurface\n").await.unwrap();
        drop(mission);

        let mut role = ControlRole::new(LoggingSink::default());
        let n = role
            .run(&mut reader, ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(role.sink().executed(), 2);
    }

    #[tokio::test]
    async fn undecodable_command_line_is_skipped() {
        let (mut mission, input) = duplex(1024);
        let mut reader = ChannelReader::new("control-in", BufReader::new(input));
        mission.write_all(b"dive 2\n\xff\xfe\nsurface\n").await.unwrap();
        drop(mission);

        let mut role = ControlRole::new(LoggingSink::default());
        let n = role
            .run(&mut reader, ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    struct FailingSink;

    #[async_trait]
    impl CommandSink for FailingSink {
        async fn execute(&mut self, _command: &Command) -> Result<(), TritonError> {
            Err(TritonError::Io(std::io::Error::other("thruster offline")))
        }
    }

    #[tokio::test]
    async fn sink_failure_ends_the_loop() {
        let (mut mission, input) = duplex(1024);
        let mut reader = ChannelReader::new("control-in", BufReader::new(input));
        mission.write_all(b"dive 2\n").await.unwrap();

        let mut role = ControlRole::new(FailingSink);
        assert!(matches!(
            role.run(&mut reader, ShutdownSignal::never()).await,
            Err(TritonError::Io(_))
        ));
    }
}
