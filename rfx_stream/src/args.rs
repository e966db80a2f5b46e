//! Device argument string parsing.
//!
//! Arguments arrive as a comma-separated `key=value` list, e.g.
//! `"n_prb=25,clock=external"`. Unknown keys are ignored so one string
//! can serve several plugins.

use rfx_frontend::ClockSource;

#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    /// Resource-block count selecting the DMA packet size.
    pub n_prb: u32,
    /// Backend context URI (transceiver plugin only).
    pub context: String,
    /// Reference clock selection (data-converter plugin only).
    pub clock: ClockSource,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            n_prb: 6,
            context: "default".to_string(),
            clock: ClockSource::Internal,
        }
    }
}

impl Args {
    pub fn parse(input: &str) -> Self {
        let mut args = Self::default();
        for field in input.split(',') {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "n_prb" => {
                    if let Ok(n) = value.parse() {
                        args.n_prb = n;
                    }
                }
                "context" => args.context = value.to_string(),
                "clock" => {
                    args.clock = if value == "external" {
                        ClockSource::External
                    } else {
                        ClockSource::Internal
                    };
                }
                _ => {}
            }
        }
        args
    }
}
