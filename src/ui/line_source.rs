use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Where the chat shell reads its input lines from.
#[async_trait]
pub trait LineSource: Send {
    /// Next line without its terminator, or `None` at end of input.
    async fn next_line(&mut self) -> Result<Option<String>>;
}

pub struct StdinLineSource {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinLineSource {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinLineSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineSource for StdinLineSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}

/// Replays scripted lines, pausing before each so pending sync work settles first.
#[cfg(test)]
pub struct MockLineSource {
    queue: std::collections::VecDeque<String>,
    pause: std::time::Duration,
}

#[cfg(test)]
impl MockLineSource {
    pub fn from(lines: &[&str]) -> Self {
        Self {
            queue: lines.iter().map(|line| (*line).to_owned()).collect(),
            pause: std::time::Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl LineSource for MockLineSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        tokio::time::sleep(self.pause).await;
        Ok(self.queue.pop_front())
    }
}
