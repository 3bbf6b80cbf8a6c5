//! The outer loop: cycle, report, pace, repeat.
//!
//! Shutdown is only observed during the pacing delay, after the report line
//! for the finished iteration has been written. An iteration is never cut in
//! half, and no lock or partially updated state survives into the delay.

use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    time::sleep,
};
use tracing::{info, warn};

use crate::config::ProbeConfig;
use crate::cycle::{CycleResult, ProbeCycle, ProbeState};
use crate::pool::ConnectionPool;
use crate::report::format_line;

pub struct Driver {
    pool: Arc<ConnectionPool>,
    config: ProbeConfig,
    state: ProbeState,
}

impl Driver {
    pub fn new(pool: Arc<ConnectionPool>, config: ProbeConfig, state: ProbeState) -> Self {
        Self {
            pool,
            config,
            state,
        }
    }

    /// Seeds the counter from the store before the first iteration.
    pub async fn start(pool: Arc<ConnectionPool>, config: ProbeConfig) -> Self {
        let state = ProbeState::seed(&pool, &config).await;
        Self::new(pool, config, state)
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Runs one iteration and returns its result without reporting it.
    pub async fn step(&mut self) -> CycleResult {
        ProbeCycle::new(&self.pool, &self.config)
            .run(&mut self.state)
            .await
    }

    /// Runs iterations until `shutdown` resolves or the configured iteration
    /// count is reached, writing one line per iteration to `out`.
    ///
    /// Only a failure to write to `out` ends the loop early.
    pub async fn run_until<F, W>(&mut self, shutdown: F, out: &mut W) -> Result<u64>
    where
        F: Future<Output = ()> + Send,
        W: AsyncWrite + Unpin,
    {
        tokio::pin!(shutdown);
        let mut completed = 0u64;

        loop {
            let result = self.step().await;
            write_line(out, &format_line(&result)).await?;
            completed += 1;

            if self.config.iterations.is_some_and(|limit| completed >= limit) {
                info!(iterations = completed, "iteration limit reached");
                break;
            }

            select! {
                biased;
                _ = &mut shutdown => {
                    info!(iterations = completed, "probe stopping");
                    break;
                }
                _ = sleep(self.config.pacing) => {}
            }
        }

        Ok(completed)
    }

    pub async fn run_until_ctrl_c<W>(&mut self, out: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        self.run_until(
            async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = ?err, "failed to install ctrl-c handler");
                    std::future::pending::<()>().await;
                }
            },
            out,
        )
        .await
    }
}

async fn write_line<W>(out: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(line.as_bytes())
        .await
        .context("failed to write report line")?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}
