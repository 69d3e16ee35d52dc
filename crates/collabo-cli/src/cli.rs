//! Command-line argument parsing.

use anyhow::{anyhow, bail, Result};
use reqwest::Method;
use serde_json::Value;

pub const USAGE: &str = "\
Usage: collabo <command>

Commands:
  login [EMAIL]                    Log in and store the session token
  signup                           Create an account (interactive)
  logout                           Forget the stored session
  status                           Show whether a session is active
  request <METHOD> <PATH> [JSON]   Send an authenticated request and print the JSON result
  help                             Show this message

Environment:
  API_URL               Base address of the Collabo API (default http://localhost:3000)
  COLLABO_TOKEN_STORE   file | keyring | memory
  COLLABO_LOG_DIR       Also write logs to a daily file in this directory
  RUST_LOG              Log filter (default warn)";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { email: Option<String> },
    Signup,
    Logout,
    Status,
    Request {
        method: Method,
        path: String,
        body: Option<Value>,
    },
    Help,
}

impl Command {
    /// Parse the arguments after the program name.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut args = args.iter().map(String::as_str);
        let command = match args.next() {
            None | Some("help") | Some("--help") | Some("-h") => Command::Help,
            Some("login") => Command::Login {
                email: args.next().map(str::to_string),
            },
            Some("signup") => Command::Signup,
            Some("logout") => Command::Logout,
            Some("status") => Command::Status,
            Some("request") => {
                let method = args
                    .next()
                    .ok_or_else(|| anyhow!("request needs a METHOD and a PATH"))?;
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| anyhow!("Invalid HTTP method '{}'", method))?;
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("request needs a PATH"))?
                    .to_string();
                let body = match args.next() {
                    Some(raw) => Some(
                        serde_json::from_str(raw)
                            .map_err(|e| anyhow!("Request body is not valid JSON: {}", e))?,
                    ),
                    None => None,
                };
                Command::Request { method, path, body }
            }
            Some(other) => bail!("Unknown command '{}'\n\n{}", other, USAGE),
        };

        if let Some(extra) = args.next() {
            bail!("Unexpected argument '{}'", extra);
        }
        Ok(command)
    }
}
