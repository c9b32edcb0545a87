//! Portfolio equity rollup
//!
//! Sessions snapshot at irregular moments, so summing raw snapshots
//! across sessions double-counts or misses. The rollup resamples every
//! active session onto a shared one-minute grid with forward fill and
//! sums per grid slot, then swaps the result into the cache atomically.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::store::Datastore;
use crate::{EquitySnapshot, PortfolioPoint};

fn grid_step() -> Duration {
    Duration::minutes(1)
}

/// Recompute the portfolio cache from the snapshots of currently
/// active sessions. Stopped sessions fall out of the rollup, so the
/// curve reflects only deployed capital. Returns the number of cached
/// points.
pub fn rebuild_cache(store: &Arc<dyn Datastore>) -> Result<usize> {
    let active: Vec<Uuid> = store
        .active_sessions()?
        .into_iter()
        .map(|s| s.id)
        .collect();
    if active.is_empty() {
        store.replace_portfolio_cache(&[])?;
        return Ok(0);
    }

    let mut per_session: HashMap<Uuid, Vec<EquitySnapshot>> = HashMap::new();
    for snapshot in store.all_snapshots()? {
        if active.contains(&snapshot.session_id) {
            per_session
                .entry(snapshot.session_id)
                .or_default()
                .push(snapshot);
        }
    }
    if per_session.is_empty() {
        store.replace_portfolio_cache(&[])?;
        return Ok(0);
    }

    let start = per_session
        .values()
        .filter_map(|s| s.first())
        .map(|s| s.timestamp)
        .min()
        .expect("non-empty snapshot sets");
    let end = per_session
        .values()
        .filter_map(|s| s.last())
        .map(|s| s.timestamp)
        .max()
        .expect("non-empty snapshot sets");
    let grid = minute_grid(start, end);

    let mut totals = vec![0.0f64; grid.len()];
    for snapshots in per_session.values() {
        forward_fill_into(&mut totals, &grid, snapshots);
    }

    let points: Vec<PortfolioPoint> = grid
        .into_iter()
        .zip(totals)
        .filter(|(_, total)| *total > 0.0)
        .map(|(timestamp, total_equity)| PortfolioPoint {
            timestamp,
            total_equity,
        })
        .collect();

    store.replace_portfolio_cache(&points)?;
    debug!(
        sessions = per_session.len(),
        points = points.len(),
        "rebuilt portfolio cache"
    );
    Ok(points.len())
}

fn minute_grid(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let step = grid_step();
    let first = start
        .duration_trunc(step)
        .expect("minute truncation cannot fail for valid timestamps");
    let mut grid = Vec::new();
    let mut cursor = first;
    while cursor <= end {
        grid.push(cursor);
        cursor += step;
    }
    if grid.is_empty() {
        grid.push(first);
    }
    grid
}

/// Add one session's forward-filled equity into the running totals.
/// Grid slots before the session's first snapshot contribute nothing.
fn forward_fill_into(totals: &mut [f64], grid: &[DateTime<Utc>], snapshots: &[EquitySnapshot]) {
    let mut idx = 0usize;
    let mut last_equity: Option<f64> = None;
    for (slot, total) in grid.iter().zip(totals.iter_mut()) {
        // Slot boundary is exclusive on the right
        let boundary = *slot + grid_step();
        while idx < snapshots.len() && snapshots[idx].timestamp < boundary {
            last_equity = Some(snapshots[idx].equity);
            idx += 1;
        }
        if let Some(equity) = last_equity {
            *total += equity;
        }
    }
}
