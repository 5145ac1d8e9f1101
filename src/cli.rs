//! Command-line interface definition using clap
//!
//! Provides structured argument parsing with automatic help generation.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// Query laboratory instruments over serial, TCP and message-based links
#[derive(Parser, Debug)]
#[command(name = "ilink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML file with a default descriptor and parameter defaults
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve a descriptor and print its parameters as JSON
    Parse {
        /// Descriptor (falls back to the config file)
        descriptor: Option<String>,
    },

    /// Send one message and print the reply
    Query {
        /// Descriptor, e.g. tcp:192.168.1.50:5025
        descriptor: String,

        /// Message to send, without terminator
        message: String,

        /// Line terminator; `\n`, `\r` and `\t` escapes are understood
        #[arg(long, default_value = "\\n")]
        terminator: String,

        /// Reply timeout in seconds (falls back to the config file)
        #[arg(long, value_name = "SECS")]
        timeout: Option<f64>,
    },

    /// List serial ports present on this machine
    Ports,
}

/// Expand the escapes accepted by `--terminator`
pub fn unescape(raw: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('0') => out.push(0),
            Some('\\') => out.push(b'\\'),
            Some(other) => {
                out.push(b'\\');
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => out.push(b'\\'),
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_verbose() {
        let cli = Cli::parse_from(["ilink", "-v", "ports"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Ports));

        let cli = Cli::parse_from(["ilink", "ports", "--verbose"]);
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_parse_descriptor() {
        let cli = Cli::parse_from(["ilink", "parse", "tcp:[::1]:5025"]);
        match cli.command {
            Command::Parse { descriptor } => assert_eq!(descriptor.as_deref(), Some("tcp:[::1]:5025")),
            _ => panic!("Expected Parse command"),
        }
    }

    #[test]
    fn test_cli_parse_query() {
        let cli = Cli::parse_from([
            "ilink",
            "--config",
            "bench.toml",
            "query",
            "tcp:10.0.0.5:5025",
            "*IDN?",
            "--terminator",
            "\\r\\n",
            "--timeout",
            "2.5",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("bench.toml")));
        match cli.command {
            Command::Query {
                descriptor,
                message,
                terminator,
                timeout,
            } => {
                assert_eq!(descriptor, "tcp:10.0.0.5:5025");
                assert_eq!(message, "*IDN?");
                assert_eq!(unescape(&terminator), b"\r\n");
                assert_eq!(timeout, Some(2.5));
            }
            _ => panic!("Expected Query command"),
        }
    }

    #[test]
    fn test_cli_query_default_terminator() {
        let cli = Cli::parse_from(["ilink", "query", "serial:/dev/ttyS0", "MEAS?"]);
        match cli.command {
            Command::Query { terminator, .. } => assert_eq!(unescape(&terminator), b"\n"),
            _ => panic!("Expected Query command"),
        }
    }

    #[test]
    fn test_unescape_passthrough() {
        assert_eq!(unescape("END"), b"END");
        assert_eq!(unescape("\\q"), b"\\q");
        assert_eq!(unescape("a\\"), b"a\\");
        assert_eq!(unescape("\\\\"), b"\\");
    }
}
