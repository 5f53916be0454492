use std::cmp::Ordering;

use serde::Serialize;

use crate::geo::haversine_km;
use crate::models::profile::Availability;
use crate::models::worker::{Coordinate, Worker};

/// Nearest worker that is online, available and located. Linear scan; the
/// first of equally distant workers wins. Workers whose distance is NaN are
/// never selected.
pub fn find_closest_worker<'a>(target: &Coordinate, workers: &'a [Worker]) -> Option<&'a Worker> {
    let mut best: Option<(&Worker, f64)> = None;

    for worker in workers.iter().filter(|worker| worker.is_eligible()) {
        let Some(location) = worker.location else {
            continue;
        };

        let distance = haversine_km(target, &location);
        if distance.is_nan() {
            continue;
        }

        match best {
            Some((_, shortest)) if shortest <= distance => {}
            _ => best = Some((worker, distance)),
        }
    }

    best.map(|(worker, _)| worker)
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedWorker {
    #[serde(flatten)]
    pub worker: Worker,
    pub distance_km: Option<f64>,
}

/// Workers matching `search` (name, email or current address), nearest
/// first; workers without a distance follow, available ones first.
pub fn rank_workers(
    target: Option<&Coordinate>,
    workers: &[Worker],
    search: Option<&str>,
) -> Vec<RankedWorker> {
    let search = search.map(str::trim).filter(|term| !term.is_empty());

    let mut ranked: Vec<RankedWorker> = workers
        .iter()
        .filter(|worker| search.is_none_or(|term| worker.matches_search(term)))
        .map(|worker| {
            let distance_km = match (target, worker.location) {
                (Some(target), Some(location)) => Some(haversine_km(target, &location)),
                _ => None,
            };
            RankedWorker {
                worker: worker.clone(),
                distance_km,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.distance_km
            .is_none()
            .cmp(&b.distance_km.is_none())
            .then_with(|| match (a.distance_km, b.distance_km) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            })
            .then_with(|| availability_rank(&a.worker).cmp(&availability_rank(&b.worker)))
    });

    ranked
}

fn availability_rank(worker: &Worker) -> u8 {
    match worker.availability {
        Availability::Available => 0,
        Availability::Busy => 1,
        Availability::Offline => 2,
    }
}
