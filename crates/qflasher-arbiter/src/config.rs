//! Arbiter configuration

use qflasher_core::ops::RetryPolicy;
use qflasher_core::transport::FastReadMode;

use crate::error::{ArbiterError, Result};
use crate::priority::Priority;

/// Default number of requests the queue holds before submitters block
pub const DEFAULT_QUEUE_DEPTH: usize = 2;

/// Default maximum bytes per read transaction
pub const DEFAULT_READ_CHUNK_SIZE: usize = 24 * 1024;

/// Fast-read bring-up settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastReadConfig {
    /// Submode used for plain reads once calibrated
    pub mode: FastReadMode,
    /// Flash address holding the calibration pattern
    pub calibration_addr: u32,
}

/// Configuration for [`QspiFlash`](crate::QspiFlash)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterConfig {
    /// Request queue capacity
    pub queue_depth: usize,
    /// Maximum bytes per read transaction
    pub read_chunk_size: usize,
    /// Connect retry budget used on every reconnect
    pub retry: RetryPolicy,
    /// Priority the dispatcher runs at between requests
    pub dispatcher_priority: Priority,
    /// Calibrate fast reads at bring-up and prefer them for plain reads
    pub fast_read: Option<FastReadConfig>,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            dispatcher_priority: Priority::default(),
            fast_read: None,
        }
    }
}

impl ArbiterConfig {
    /// Parse a `key=value,...` parameter string
    ///
    /// Supported keys:
    /// - `queue=<n>`: request queue capacity (default: 2)
    /// - `chunk=<bytes>`: read transaction size (default: 24576)
    /// - `retries=<n>`: extra connect attempts (default: 5)
    /// - `retry_delay=<us>`: delay between connect attempts (default: 1000)
    /// - `priority=<n>`: dispatcher baseline priority (default: 0)
    /// - `fast_read=<raw|nibble_swap>`: enable calibrated fast reads
    /// - `cal_addr=<addr>`: calibration pattern address (default: 0)
    ///
    /// Numbers may be given in decimal or with a `0x` prefix.
    ///
    /// # Example
    ///
    /// ```
    /// use qflasher_arbiter::ArbiterConfig;
    ///
    /// let config = ArbiterConfig::from_params("queue=4,fast_read=raw,cal_addr=0x1000").unwrap();
    /// assert_eq!(config.queue_depth, 4);
    /// assert_eq!(config.fast_read.unwrap().calibration_addr, 0x1000);
    /// ```
    pub fn from_params(params: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut fast_read_mode = None;
        let mut calibration_addr = 0;

        for opt in params.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = opt.split_once('=').ok_or_else(|| {
                ArbiterError::InvalidParameter(format!(
                    "Invalid parameter format: '{}' (expected key=value)",
                    opt
                ))
            })?;

            match key {
                "queue" => {
                    let depth = parse_number(key, value)? as usize;
                    if depth == 0 {
                        return Err(ArbiterError::InvalidParameter(
                            "Invalid queue: must be at least 1".to_string(),
                        ));
                    }
                    config.queue_depth = depth;
                }
                "chunk" => {
                    let chunk = parse_number(key, value)? as usize;
                    if chunk == 0 {
                        return Err(ArbiterError::InvalidParameter(
                            "Invalid chunk: must be at least 1".to_string(),
                        ));
                    }
                    config.read_chunk_size = chunk;
                }
                "retries" => config.retry.retries = parse_number(key, value)?,
                "retry_delay" => config.retry.delay_us = parse_number(key, value)?,
                "priority" => config.dispatcher_priority = Priority(parse_number(key, value)?),
                "fast_read" => {
                    fast_read_mode = Some(match value {
                        "raw" => FastReadMode::Raw,
                        "nibble_swap" => FastReadMode::NibbleSwap,
                        _ => {
                            return Err(ArbiterError::InvalidParameter(format!(
                                "Invalid fast_read: {} (must be raw or nibble_swap)",
                                value
                            )))
                        }
                    });
                }
                "cal_addr" => calibration_addr = parse_number(key, value)?,
                _ => {
                    log::warn!("Unknown arbiter option: {}={}", key, value);
                }
            }
        }

        config.fast_read = fast_read_mode.map(|mode| FastReadConfig {
            mode,
            calibration_addr,
        });
        Ok(config)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32> {
    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    parsed.map_err(|_| ArbiterError::InvalidParameter(format!("Invalid {} value: {}", key, value)))
}
