use std::io::{self, Read};

use crate::api::LocalApi;
use crate::cli::{
    ApiCommand, ApprovalsCommand, Cli, Command, ConfigCommand, McpCommand, RunArgs,
};
use crate::color;
use crate::config::Config;
use crate::errors::WardenError;
use crate::logging;
use crate::manager::Manager;
use crate::output::Formatter;
use crate::types::DaemonState;
use crate::update_check;
use crate::watch;

pub fn dispatch(cli: Cli) -> Result<(), WardenError> {
    let config = Config::load(cli.config.as_deref())
        .map_err(|e| WardenError::Config(format!("{e:#}")))?;
    logging::init(cli.verbose, config.log.filter.as_deref());

    let color = !cli.json && color::resolve_color();
    let mut out = Formatter::new(io::stdout().lock(), cli.json, color);

    match cli.command {
        Command::Start => {
            let manager = Manager::from_config(&config)?;
            manager.start()?;
            let status = manager.snapshot();
            let message = if status.managed {
                format!("agentguard {} started", status.version)
            } else {
                format!("agentguard {} is already running", status.version)
            };
            out.format_ack(&message, None)?;
        }
        Command::Stop => {
            let manager = Manager::from_config(&config)?;
            manager.stop()?;
            let message = if manager.snapshot().state == DaemonState::Running {
                "agentguard was not started by warden; left it running"
            } else {
                "agentguard stopped"
            };
            out.format_ack(message, None)?;
        }
        Command::Restart => {
            let manager = Manager::from_config(&config)?;
            manager.restart()?;
            let status = manager.snapshot();
            out.format_ack(&format!("agentguard {} restarted", status.version), None)?;
        }
        Command::Status => {
            let manager = Manager::from_config(&config)?;
            out.format_status(&manager.status())?;
        }
        Command::Update => {
            let manager = Manager::from_config(&config)?;
            let tag = manager.update()?;
            out.format_ack(&format!("agentguard updated to {tag}"), Some(&tag))?;
        }
        Command::CheckUpdate => {
            let manager = Manager::from_config(&config)?;
            let report = update_check::check(manager.installer(), &config.release.self_latest_url);
            out.format_update_report(&report)?;
        }
        Command::Run(RunArgs { interval }) => {
            let manager = Manager::from_config(&config)?;
            let shutdown = watch::register_signal_handler()?;
            let interval = std::time::Duration::from_secs(interval);
            let mut write_err = None;
            watch::run_loop(&manager, interval, &shutdown, |status| {
                if write_err.is_none()
                    && let Err(e) = out.format_status(status)
                {
                    write_err = Some(e);
                }
            });
            if let Some(e) = write_err {
                return Err(e.into());
            }
        }
        Command::Api(args) => {
            let api = LocalApi::new(&config.agent.api_base);
            let body = match args.command {
                ApiCommand::Stats => api.stats(),
                ApiCommand::Config(c) => match c.command {
                    ConfigCommand::Get { domain } => api.config(domain),
                    ConfigCommand::Set { domain, body } => {
                        api.save_config(domain, &read_body(body)?)
                    }
                },
                ApiCommand::Approvals(a) => match a.command.unwrap_or(ApprovalsCommand::List) {
                    ApprovalsCommand::List => api.approvals(),
                    ApprovalsCommand::Resolve { id, action } => api.handle_approval(&id, &action),
                },
                ApiCommand::Mcp(m) => match m.command {
                    McpCommand::Policy => api.mcp_policy(),
                    McpCommand::SetPolicy { body } => api.save_mcp_policy(&read_body(body)?),
                    McpCommand::Audit => api.mcp_audit(),
                    McpCommand::Clients => api.mcp_clients(),
                    McpCommand::Wrap { client } => api.wrap_mcp_client(&client, false),
                    McpCommand::Unwrap { client } => api.wrap_mcp_client(&client, true),
                },
            };
            out.format_api_body(&body)?;
        }
    }
    Ok(())
}

/// Resolve a JSON body argument; `-` reads it from stdin.
fn read_body(arg: String) -> Result<String, WardenError> {
    let body = if arg == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        arg
    };
    serde_json::from_str::<serde_json::Value>(&body)
        .map_err(|e| WardenError::Usage(format!("body is not valid JSON: {e}")))?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_json_body_is_accepted() {
        assert_eq!(read_body("{\"a\":1}".into()).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn invalid_body_is_a_usage_error() {
        let err = read_body("{not json".into()).unwrap_err();
        assert!(matches!(err, WardenError::Usage(_)));
        assert_eq!(err.exit_code(), crate::errors::EXIT_USAGE);
    }
}
