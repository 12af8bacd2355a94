//! `fetch` subcommand: one request through a full execution core.

use std::sync::Arc;
use std::time::Duration;

use super::{flag_value, has_flag};
use crate::config::CoreConfig;
use crate::pipeline::{HttpTransport, RequestConfig, RequestError};
use crate::scheduler::Priority;
use crate::{Collaborators, ExecCore};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Options accepted by `fetch`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchArgs {
    pub url: String,
    pub retries: u32,
    pub timeout: Option<Duration>,
    pub priority: Priority,
    pub progress: bool,
}

impl FetchArgs {
    /// Parse `fetch URL [--retries N] [--timeout-ms N] [--priority P] [--progress]`.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let url = args
            .iter()
            .skip(2)
            .find(|arg| arg.starts_with("http://") || arg.starts_with("https://"))
            .ok_or("missing URL")?
            .clone();

        let retries = match flag_value(args, "--retries") {
            Some(raw) => raw.parse().map_err(|_| format!("invalid --retries: {}", raw))?,
            None => 0,
        };
        let timeout = match flag_value(args, "--timeout-ms") {
            Some(raw) => Some(Duration::from_millis(
                raw.parse().map_err(|_| format!("invalid --timeout-ms: {}", raw))?,
            )),
            None => None,
        };
        let priority = match flag_value(args, "--priority") {
            Some(raw) => raw.parse::<Priority>()?,
            None => Priority::Normal,
        };

        Ok(Self {
            url,
            retries,
            timeout,
            priority,
            progress: has_flag(args, "--progress"),
        })
    }

    fn request_config(&self) -> RequestConfig {
        let mut config = RequestConfig::new().retries(self.retries).priority(self.priority);
        if let Some(timeout) = self.timeout {
            config = config.timeout(timeout);
        }
        if self.progress {
            config = config.on_download_progress(|p| match p.total {
                Some(total) => eprintln!("downloaded {}/{} bytes", p.loaded, total),
                None => eprintln!("downloaded {} bytes", p.loaded),
            });
        }
        config
    }
}

/// Run the fetch command.
///
/// Exit codes: 0 on success, 1 if the request failed, 2 on usage errors.
pub async fn run_fetch(config: CoreConfig, args: &[String]) -> i32 {
    let fetch = match FetchArgs::parse(args) {
        Ok(fetch) => fetch,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };

    let transport = match HttpTransport::new(CONNECT_TIMEOUT) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let core = ExecCore::new(config, Collaborators::new(Arc::new(transport)));
    core.start();

    let result = tokio::select! {
        result = core.pipeline().request_value(&fetch.url, fetch.request_config()) => result,
        _ = tokio::signal::ctrl_c() => {
            core.pipeline().cancel_all_requests();
            Err(RequestError::Cancelled)
        }
    };
    core.shutdown().await;

    match result {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(text) => {
                println!("{}", text);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Err(e) => {
            eprintln!("Request failed: {}", e);
            1
        }
    }
}
