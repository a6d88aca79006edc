use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use tg_core::types::{PatternId, TrackerId};

use crate::parser::ParsedTrackerDb;

pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
    /// Patterns whose id has no bug entry, or whose bug has no tracker
    pub orphaned: usize,
}

/// Drop duplicate and orphaned patterns in place.
pub fn optimize_db(db: &mut ParsedTrackerDb) -> OptimizeStats {
    let before = db.pattern_count();

    let trackers: HashSet<TrackerId> = db.trackers.iter().map(|t| t.id).collect();
    let orphan_bugs = db.bugs.len();
    db.bugs.retain(|(_, tracker)| trackers.contains(tracker));
    let orphan_bugs = orphan_bugs - db.bugs.len();
    if orphan_bugs > 0 {
        log::warn!("Dropping {} bugs with unknown trackers", orphan_bugs);
    }
    let known: HashMap<PatternId, TrackerId> = db.bugs.iter().copied().collect();

    let mut orphaned = 0usize;
    let mut keep = |id: PatternId| {
        let ok = known.contains_key(&id);
        if !ok {
            orphaned += 1;
        }
        ok
    };
    db.hosts.retain(|p| keep(p.id));
    db.host_paths.retain(|p| keep(p.id));
    db.paths.retain(|(_, id)| keep(*id));
    db.regexes.retain(|(id, _)| keep(*id));
    db.exceptions.retain(|(id, _)| known.contains_key(id));

    let mut deduped = 0usize;
    deduped += dedupe(&mut db.hosts, |p| p.clone());
    deduped += dedupe(&mut db.host_paths, |p| p.clone());
    // A path string maps to one pattern; the first id wins
    deduped += dedupe(&mut db.paths, |(path, _)| path.clone());
    deduped += dedupe(&mut db.regexes, |(id, _)| *id);
    dedupe(&mut db.exceptions, |e| e.clone());

    OptimizeStats {
        before,
        after: db.pattern_count(),
        deduped,
        orphaned,
    }
}

fn dedupe<T, K, F>(items: &mut Vec<T>, key: F) -> usize
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen: HashSet<K> = HashSet::new();
    let before = items.len();
    items.retain(|item| seen.insert(key(item)));
    before - items.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{HostPathPattern, HostPattern};
    use tg_core::catalog::Tracker;

    #[test]
    fn removes_duplicates_and_orphans() {
        let mut db = ParsedTrackerDb {
            trackers: vec![Tracker {
                id: 41,
                name: "DoubleClick".to_string(),
                category: "advertising".to_string(),
                tags: Vec::new(),
            }],
            bugs: vec![(1, 41), (2, 41), (3, 999)],
            hosts: vec![
                HostPattern { host: "doubleclick.net".to_string(), id: 1 },
                HostPattern { host: "doubleclick.net".to_string(), id: 1 },
                HostPattern { host: "orphan.net".to_string(), id: 3 },
            ],
            host_paths: vec![HostPathPattern {
                host: "google.com".to_string(),
                path: "pagead/".to_string(),
                id: 2,
            }],
            paths: vec![("/pixel.gif".to_string(), 1), ("/pixel.gif".to_string(), 2), ("/x".to_string(), 77)],
            regexes: vec![(2, "a".to_string())],
            exceptions: vec![(1, "google.com".to_string()), (3, "x.com".to_string())],
            ..ParsedTrackerDb::default()
        };

        let stats = optimize_db(&mut db);
        assert_eq!(stats.before, 8);
        assert_eq!(stats.after, 4);
        assert_eq!(stats.orphaned, 2);
        assert_eq!(stats.deduped, 2);
        assert_eq!(db.bugs, vec![(1, 41), (2, 41)]);
        assert_eq!(db.paths, vec![("/pixel.gif".to_string(), 1)]);
        assert_eq!(db.exceptions, vec![(1, "google.com".to_string())]);
    }
}
