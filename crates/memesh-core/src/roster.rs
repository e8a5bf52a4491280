use crate::presence::PresenceTracker;
use memesh_api::Identity;

/// Peers whose display name or public label contains `query`
/// (case-insensitive), optionally restricted to those currently online.
/// Input order is preserved.
pub fn filter_roster<'a>(
    peers: &'a [Identity],
    query: &str,
    online_only: bool,
    presence: &PresenceTracker,
) -> Vec<&'a Identity> {
    let needle = query.trim().to_lowercase();
    peers
        .iter()
        .filter(|peer| !online_only || presence.is_online(&peer.id))
        .filter(|peer| {
            needle.is_empty()
                || peer.display_name.to_lowercase().contains(&needle)
                || peer.public_label.to_lowercase().contains(&needle)
        })
        .collect()
}
