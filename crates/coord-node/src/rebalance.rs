//! Data-center-aware, spare-leader-aware partition assignment.
//!
//! Two phases per §4.3: compensate each partition up to its required size,
//! preferring data-center diversity, then rebalance load across the whole
//! plan by moving replicas from over-loaded to under-loaded candidates
//! without reducing a partition's data-center diversity. Both phases use
//! sorted iteration and string tie-breaks so the result is a pure function
//! of its inputs -- applying the algorithm twice in a row is a no-op.

use std::collections::BTreeMap;

use coord_core::{Address, DataCenterResolver, PartitionKey};

/// One partition's required replica count and current assignment, as seen
/// by the rebalancer.
#[derive(Debug, Clone)]
pub struct RebalanceEntry {
    pub required: u32,
    pub current: Vec<Address>,
}

/// Computes a new assignment for every entry in `plan`, given the current
/// cluster's `candidates` (already filtered for `spare_leader`).
#[must_use]
pub fn rebalance(
    plan: &BTreeMap<PartitionKey, RebalanceEntry>,
    candidates: &[Address],
    dc_resolver: &dyn DataCenterResolver,
) -> BTreeMap<PartitionKey, Vec<Address>> {
    let candidate_set: std::collections::BTreeSet<Address> = candidates.iter().cloned().collect();
    let mut load: BTreeMap<Address, u32> = candidates.iter().map(|a| (a.clone(), 0)).collect();

    let mut compensated: BTreeMap<PartitionKey, Vec<Address>> = BTreeMap::new();
    for (key, entry) in plan {
        let mut assigned: Vec<Address> = entry
            .current
            .iter()
            .filter(|a| candidate_set.contains(a))
            .cloned()
            .collect();

        for a in &assigned {
            *load.entry(a.clone()).or_insert(0) += 1;
        }
        while (assigned.len() as u32) < entry.required {
            let Some(next) = pick_fill_candidate(&assigned, candidates, &load, dc_resolver) else {
                break;
            };
            *load.entry(next.clone()).or_insert(0) += 1;
            assigned.push(next);
        }
        compensated.insert(key.clone(), assigned);
    }

    if candidates.is_empty() {
        return compensated;
    }

    let total: u32 = load.values().sum();
    let n = candidates.len() as u32;
    let ceil_limit = total.div_ceil(n);
    let floor_limit = total / n;

    let mut rounds = compensated.len().saturating_mul(candidates.len()).max(1);
    loop {
        if rounds == 0 {
            break;
        }
        rounds -= 1;

        let Some(heavy) = load
            .iter()
            .filter(|(_, &l)| l > ceil_limit)
            .max_by_key(|(addr, &l)| (l, (*addr).clone()))
            .map(|(a, _)| a.clone())
        else {
            break;
        };
        let Some(light) = load
            .iter()
            .filter(|(_, &l)| l < floor_limit)
            .min_by_key(|(addr, &l)| (l, (*addr).clone()))
            .map(|(a, _)| a.clone())
        else {
            break;
        };

        let Some((key, idx)) = find_swappable_partition(&compensated, &heavy, &light, dc_resolver) else {
            break;
        };
        let members = compensated.get_mut(&key).expect("key from compensated");
        members[idx] = light.clone();
        *load.entry(heavy).or_insert(0) -= 1;
        *load.entry(light).or_insert(0) += 1;
    }

    compensated
}

/// Picks the best candidate to add to `assigned`: prefer a data center not
/// already represented, then the lowest current load, then address order.
fn pick_fill_candidate(
    assigned: &[Address],
    candidates: &[Address],
    load: &BTreeMap<Address, u32>,
    dc_resolver: &dyn DataCenterResolver,
) -> Option<Address> {
    let used_dcs: std::collections::BTreeSet<String> =
        assigned.iter().map(|a| dc_resolver.data_center_of(a)).collect();

    let mut pool: Vec<&Address> = candidates.iter().filter(|a| !assigned.contains(a)).collect();
    pool.sort_by_key(|a| {
        let dc = dc_resolver.data_center_of(a);
        let new_dc = used_dcs.contains(&dc);
        (new_dc, load.get(*a).copied().unwrap_or(0), (*a).clone())
    });
    pool.into_iter().next().cloned()
}

/// Finds a partition in `compensated` that holds `heavy` and not `light`,
/// such that swapping them does not reduce the partition's data-center
/// diversity. Returns the partition key and the index of `heavy` within it.
fn find_swappable_partition(
    compensated: &BTreeMap<PartitionKey, Vec<Address>>,
    heavy: &Address,
    light: &Address,
    dc_resolver: &dyn DataCenterResolver,
) -> Option<(PartitionKey, usize)> {
    for (key, members) in compensated {
        if members.contains(light) {
            continue;
        }
        let Some(idx) = members.iter().position(|a| a == heavy) else {
            continue;
        };
        let before: std::collections::BTreeSet<String> =
            members.iter().map(|a| dc_resolver.data_center_of(a)).collect();
        let mut after_members = members.clone();
        after_members[idx] = light.clone();
        let after: std::collections::BTreeSet<String> =
            after_members.iter().map(|a| dc_resolver.data_center_of(a)).collect();
        if after.len() >= before.len() {
            return Some((key.clone(), idx));
        }
    }
    None
}
