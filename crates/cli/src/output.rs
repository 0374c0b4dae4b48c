//! Terminal output for the redemption CLI.
//!
//! Every command prints either human-readable text or a single JSON document
//! on stdout; errors go to stderr in both modes.

use anyhow::Result;
use colored::Colorize;
use nbtc_orchestrator::RedemptionRequest;
use nbtc_types::SessionState;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// One input of a redemption as shown to the operator.
#[derive(Debug, Serialize, Tabled)]
pub struct InputRow {
    #[tabled(rename = "Input")]
    pub input: usize,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "State")]
    pub state: String,
    #[tabled(rename = "Sign ID")]
    pub sign_id: String,
}

pub struct OutputFormatter {
    colored: bool,
    pub json_mode: bool,
}

impl OutputFormatter {
    pub fn new(colored: bool, json_mode: bool) -> Self {
        Self { colored, json_mode }
    }

    fn status(&self, mark: &str, message: &str, paint: fn(&str) -> colored::ColoredString) {
        if self.colored {
            println!("{} {}", paint(mark).bold(), paint(message));
        } else {
            println!("{} {}", mark, message);
        }
    }

    pub fn success(&self, message: &str) {
        self.status("✓", message, |s| s.green());
    }

    pub fn warning(&self, message: &str) {
        self.status("⚠", message, |s| s.yellow());
    }

    pub fn info(&self, message: &str) {
        self.status("ℹ", message, |s| s.normal());
    }

    /// Errors go to stderr so JSON output stays parseable.
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("{} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("✗ {}", message);
        }
    }

    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n{}", title.bold().underline());
        } else {
            println!("\n{}", title);
        }
    }

    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("  {}: {}", key.bold(), value);
        } else {
            println!("  {}: {}", key, value);
        }
    }

    pub fn json<T: Serialize>(&self, data: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(data)?);
        Ok(())
    }

    /// Summary of a loaded redemption: where the funds go and what it costs.
    pub fn redemption(&self, request: &RedemptionRequest) {
        let unsigned = &request.unsigned;
        self.header(&format!("Redemption {}", request.redeem_id));
        self.kv("dWallet", &request.dwallet_id.to_string());
        self.kv("Inputs", &request.input_count().to_string());
        self.kv("Spent", &self.format_sats(unsigned.total_input_sats));
        self.kv("Amount", &self.format_sats(unsigned.send_amount_sats));
        self.kv("Fee", &self.format_sats(unsigned.fee_sats));
        self.kv("Change", &self.format_sats(unsigned.change_sats));
        self.kv("Unsigned txid", &unsigned.txid().to_string());
    }

    /// Per-input signing progress.
    pub fn input_rows(&self, request: &RedemptionRequest) -> Vec<InputRow> {
        (0..request.input_count())
            .map(|i| InputRow {
                input: i,
                value: request
                    .unsigned
                    .inputs
                    .get(i)
                    .map(|input| self.format_sats(input.value))
                    .unwrap_or_default(),
                state: match (request.signature(i), request.session(i)) {
                    (Some(_), _) => self.format_state(SessionState::Verified),
                    (None, Some(session)) => self.format_state(session.state()),
                    (None, None) => "pending".to_string(),
                },
                sign_id: request
                    .signature(i)
                    .map(|s| s.sign_id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect()
    }

    pub fn inputs(&self, request: &RedemptionRequest) {
        let mut table = Table::new(self.input_rows(request));
        table.with(Style::rounded());
        println!("\n{}", table);
    }

    /// Satoshis with thousands separators.
    pub fn format_sats(&self, sats: u64) -> String {
        let digits = sats.to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(c);
        }
        format!("{} sats", grouped)
    }

    /// Session state, colored by how far the input got.
    pub fn format_state(&self, state: SessionState) -> String {
        let text = state.to_string();
        if !self.colored || self.json_mode {
            return text;
        }

        match state {
            SessionState::Verified => text.green().to_string(),
            SessionState::Failed | SessionState::TimedOut => text.red().to_string(),
            SessionState::SignRequested | SessionState::SignCompleted => text.cyan().to_string(),
            _ => text.yellow().to_string(),
        }
    }

    pub fn format_bool(&self, value: bool) -> String {
        match (self.colored, value) {
            (false, _) => value.to_string(),
            (true, true) => "yes".green().to_string(),
            (true, false) => "no".red().to_string(),
        }
    }
}
