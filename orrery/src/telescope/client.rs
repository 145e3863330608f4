use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use super::direction::Direction;
use super::protocol::{PositionFrame, StreamDecoder};
use crate::link::{ConnectionError, Handle, LinkHandler, Outbox};
use crate::trace::{debug, warn};

/// Position samples kept for interpolation.
pub const HISTORY_LEN: usize = 16;

/// One decoded position, stamped with the local time it arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub received_us: i64,
    pub server_time_us: i64,
    pub direction: Direction,
    pub status: i32,
}

/// Connection handler for one telescope server.
#[derive(Debug)]
pub struct TelescopeLink {
    name: String,
    delay_us: i64,
    decoder: StreamDecoder,
    history: VecDeque<PositionSample>,
}

impl TelescopeLink {
    #[must_use]
    pub fn new(name: impl Into<String>, delay_us: i64) -> Self {
        Self {
            name: name.into(),
            delay_us,
            decoder: StreamDecoder::default(),
            history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn has_known_position(&self) -> bool {
        !self.history.is_empty()
    }

    #[must_use]
    pub fn last_sample(&self) -> Option<&PositionSample> {
        self.history.back()
    }

    /// Pointing shown at local time `now_us`, i.e. interpolated at
    /// `now_us - delay`.
    #[must_use]
    pub fn position(&self, now_us: i64) -> Option<Direction> {
        self.position_at(now_us - self.delay_us)
    }

    /// Interpolated pointing at `time_us` (local clock). Clamps to the
    /// oldest or newest sample outside the recorded span.
    #[must_use]
    pub fn position_at(&self, time_us: i64) -> Option<Direction> {
        let first = self.history.front()?;
        if time_us <= first.received_us {
            return Some(first.direction);
        }
        for (a, b) in self.history.iter().zip(self.history.iter().skip(1)) {
            if time_us < b.received_us {
                let span = (b.received_us - a.received_us) as f64;
                if span <= 0.0 {
                    return Some(b.direction);
                }
                let t = (time_us - a.received_us) as f64 / span;
                return Some(a.direction.lerp(&b.direction, t));
            }
        }
        self.history.back().map(|s| s.direction)
    }

    /// Stores a position. Samples that arrive with an older local time than
    /// the newest one are dropped.
    pub fn record(&mut self, received_us: i64, frame: &PositionFrame) {
        if let Some(last) = self.history.back()
            && received_us < last.received_us
        {
            return;
        }
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(PositionSample {
            received_us,
            server_time_us: frame.time_us,
            direction: frame.direction(),
            status: frame.status,
        });
    }
}

impl LinkHandler for TelescopeLink {
    fn on_connected(&mut self, handle: Handle, _outbox: &mut Outbox) {
        debug!(%handle, telescope = %self.name, "telescope connected");
    }

    fn on_readable(
        &mut self,
        _handle: Handle,
        bytes: &[u8],
        _outbox: &mut Outbox,
    ) -> Result<(), ConnectionError> {
        self.decoder.extend(bytes);
        let now = now_us();
        while let Some(frame) = self
            .decoder
            .next_frame()
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?
        {
            if frame.status != 0 {
                debug!(telescope = %self.name, status = frame.status, "telescope reports non-zero status");
            }
            self.record(now, &frame);
        }
        Ok(())
    }

    fn on_disconnect(&mut self, handle: Handle, error: &ConnectionError) {
        warn!(%handle, telescope = %self.name, %error, "telescope link lost");
    }
}

/// Microseconds since the Unix epoch, the time base of the wire protocol.
#[must_use]
pub fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
}
