/* This file is part of agora
 *
 * Copyright (C) 2023-2026 agora developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{future::Future, time::Duration};

use smol::Timer;

use crate::{Error, Result};

/// Await a future or fail with [`Error::TimeoutError`] after a
/// duration of time. Peer talk and gossip rounds are bounded with
/// this; the inner future is dropped on expiry.
pub async fn timeout<F, T>(dur: Duration, f: F) -> Result<T>
where
    F: Future<Output = T>,
{
    let fut = async { Ok(f.await) };
    let deadline = async {
        Timer::after(dur).await;
        Err(Error::TimeoutError)
    };

    smol::future::or(fut, deadline).await
}
