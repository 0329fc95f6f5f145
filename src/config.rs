// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Engine configuration.

use crate::money::MAX_SCALE;
use std::time::Duration;

/// Tunables shared by the ledger and the voting engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Fractional digits per major unit when converting at the edges
    /// (2 for cents).
    pub currency_scale: u32,
    /// Upper bound on waiting for a trip or activity lock. `None` waits
    /// indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl EngineConfig {
    pub const DEFAULT_SCALE: u32 = 2;

    pub fn with_currency_scale(mut self, scale: u32) -> Self {
        self.currency_scale = scale.min(MAX_SCALE);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency_scale: Self::DEFAULT_SCALE,
            lock_timeout: None,
        }
    }
}
