//! Transactions from several threads against one orchestrator.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use whatif_core::{BranchOrchestrator, InMemoryVersionStore, StudioConfig, CANONICAL_TIMELINE};
use whatif_ledger::{Event, Mutation, Revelation, StoryOrder, TimelineId};

const PER_WRITER: StoryOrder = 20;

fn studio() -> BranchOrchestrator {
    BranchOrchestrator::bootstrap(
        StudioConfig::default(),
        Arc::new(InMemoryVersionStore::new()),
        "Initial ingestion from screenplay",
        vec![Mutation::event(
            Event::new("e1", "s1", 1)
                .with_present(["marcus", "jane"])
                .revealing(Revelation::new("jane.wears_ring")),
            vec![],
        )],
    )
    .unwrap()
}

/// Append `PER_WRITER` events named `prefix<n>` at orders `base..`.
fn write_scenes(studio: &BranchOrchestrator, timeline: &TimelineId, prefix: &str, base: StoryOrder) {
    for n in 0..PER_WRITER {
        let event = Event::new(format!("{prefix}{n}"), format!("{prefix}-scene"), base + n).with_present(["marcus"]);
        studio.append_event(timeline, event, vec![]).unwrap();
    }
}

fn event_ids(studio: &BranchOrchestrator, timeline: &TimelineId) -> Vec<String> {
    let world = studio.world(timeline).unwrap();
    world.events().iter().map(|record| record.event.id.to_string()).collect()
}

#[test]
fn writers_serialize_per_timeline() {
    let studio = studio();
    let main = TimelineId::from(CANONICAL_TIMELINE);
    let noir = studio.fork_timeline(&main, "noir").unwrap();

    thread::scope(|scope| {
        scope.spawn(|| write_scenes(&studio, &main, "day", 100));
        scope.spawn(|| write_scenes(&studio, &main, "night", 300));
        scope.spawn(|| write_scenes(&studio, &noir, "rain", 100));
    });

    let per_writer = PER_WRITER as usize;
    assert_eq!(studio.timeline(&main).unwrap().decision_path.len(), 1 + 2 * per_writer);
    assert_eq!(studio.timeline(&noir).unwrap().decision_path.len(), 1 + per_writer);
    assert_eq!(studio.fork_point(&main, &noir).unwrap(), studio.root());

    let on_main = event_ids(&studio, &main);
    let on_noir = event_ids(&studio, &noir);
    assert_eq!(on_main.len(), 1 + 2 * per_writer);
    assert_eq!(on_noir.len(), 1 + per_writer);
    assert!(on_main.iter().all(|id| !id.starts_with("rain")));
    assert!(on_noir.iter().all(|id| !id.starts_with("day") && !id.starts_with("night")));

    for timeline in [&main, &noir] {
        let world = studio.world(timeline).unwrap();
        let orders: BTreeSet<StoryOrder> = world.events().iter().map(|record| record.story_order()).collect();
        assert_eq!(orders.len(), world.len());
        assert!(!studio.check_staleness(timeline).unwrap());
    }
}

#[test]
fn index_snapshot_is_stable_while_writers_run() {
    let studio = studio();
    let main = TimelineId::from(CANONICAL_TIMELINE);
    let held = studio.index(&main).unwrap();
    let held_version = held.version.clone();
    let held_bytes = held.to_bytes().unwrap();

    thread::scope(|scope| {
        scope.spawn(|| write_scenes(&studio, &main, "day", 100));
        scope.spawn(|| {
            for _ in 0..200 {
                if let Some(index) = studio.committed_index(&main) {
                    // One event per decision on this timeline, in any snapshot.
                    assert_eq!(index.events().len(), index.decisions().len());
                }
            }
        });
    });

    assert_eq!(held.version, held_version);
    assert_eq!(held.to_bytes().unwrap(), held_bytes);
    assert_eq!(held.events().len(), 1);

    let latest = studio.index(&main).unwrap();
    assert_ne!(latest.version, held_version);
    assert_eq!(latest.events().len(), 1 + PER_WRITER as usize);
}
