//! Install order for batches of journeys
//!
//! A journey that calls another journey through an inner-tree evaluator node
//! can only be installed once the called journey exists on the target.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::{CoreError, Result, export::JourneyBundle, node_types::NodeClass};

/// Journeys a bundle calls, excluding itself
pub fn journey_dependencies(bundle: &JourneyBundle) -> BTreeSet<String> {
    bundle
        .nodes
        .values()
        .filter(|node| NodeClass::of(node.type_name()).inner_tree)
        .filter_map(|node| node.inner_tree())
        .filter(|tree| *tree != bundle.name())
        .map(str::to_string)
        .collect()
}

/// Outcome of dependency resolution for one batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Journeys that can be installed, in install order
    pub order: Vec<String>,

    /// Journeys that cannot, with the dependencies still outstanding
    pub unresolved: BTreeMap<String, Vec<String>>,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<String>> {
        if self.unresolved.is_empty() {
            Ok(self.order)
        } else {
            Err(CoreError::DependencyUnresolved {
                unresolved: self.unresolved,
            })
        }
    }
}

/// Compute an install order for `dependencies` (journey -> journeys it calls)
/// given the journeys already `installed` on the target
///
/// Each pass over the pending work list resolves every journey whose
/// dependencies are installed or already resolved. Passes stop once the list
/// is empty or a pass resolves nothing, which leaves only cycles and
/// journeys with missing dependencies.
pub fn resolve_install_order(
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    installed: &BTreeSet<String>,
) -> Resolution {
    let mut resolved: BTreeSet<&String> = BTreeSet::new();
    let mut order = Vec::with_capacity(dependencies.len());
    let mut pending: Vec<(&String, &BTreeSet<String>)> = dependencies.iter().collect();

    let satisfied = |journey: &String, dep: &String, resolved: &BTreeSet<&String>| {
        dep == journey || resolved.contains(dep) || installed.contains(dep)
    };

    let mut pass = 0;
    loop {
        pass += 1;
        let before = pending.len();
        pending.retain(|(journey, deps)| {
            let ready = deps.iter().all(|dep| satisfied(*journey, dep, &resolved));
            if ready {
                resolved.insert(*journey);
                order.push((*journey).clone());
            }
            !ready
        });
        debug!(
            pass,
            resolved = before - pending.len(),
            pending = pending.len(),
            "Resolution pass"
        );
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }

    let unresolved: BTreeMap<String, Vec<String>> = pending
        .into_iter()
        .map(|(journey, deps)| {
            let missing = deps
                .iter()
                .filter(|dep| !satisfied(journey, *dep, &resolved))
                .cloned()
                .collect();
            (journey.clone(), missing)
        })
        .collect();

    for (journey, missing) in &unresolved {
        warn!(journey = %journey, missing = ?missing, "Unresolved journey dependencies");
    }

    Resolution { order, unresolved }
}

/// Resolve a batch of bundles keyed by journey name
pub fn resolve_bundles(
    bundles: &BTreeMap<String, JourneyBundle>,
    installed: &BTreeSet<String>,
) -> Resolution {
    let dependencies = bundles
        .iter()
        .map(|(name, bundle)| (name.clone(), journey_dependencies(bundle)))
        .collect();
    resolve_install_order(&dependencies, installed)
}
