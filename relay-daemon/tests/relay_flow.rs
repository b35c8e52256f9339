//! Ingest and sync driven against one storage directory, the way the
//! daemon's producer and consumer tasks share it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use relay_core::{MediaKind, PostId, RecordStore};
use relay_ingest::{
    FetchQuery, IngestEngine, Progress, SourceClient, SourceError, SourceEvent, SourceMedia,
    SourceMessage,
};
use relay_sync::{
    Capabilities, CycleOutcome, PlatformSyncer, SendError, SenderAdapter, SyncerOptions,
};
use tempfile::TempDir;

const WINDOW: Duration = Duration::from_millis(500);

#[derive(Default)]
struct ChannelSource {
    messages: BTreeMap<i64, SourceMessage>,
}

impl ChannelSource {
    fn with(messages: &[SourceMessage]) -> Self {
        Self {
            messages: messages.iter().map(|m| (m.id, m.clone())).collect(),
        }
    }
}

impl SourceClient for ChannelSource {
    fn name(&self) -> &str {
        "channel"
    }

    fn fetch_messages(&mut self, query: &FetchQuery) -> Result<Vec<SourceMessage>, SourceError> {
        Ok(match query {
            FetchQuery::Latest { limit } => {
                let skip = self.messages.len().saturating_sub(*limit);
                self.messages.values().skip(skip).cloned().collect()
            }
            FetchQuery::Ids(ids) => ids
                .iter()
                .filter_map(|id| self.messages.get(id).cloned())
                .collect(),
        })
    }

    fn download_media(
        &mut self,
        _message: &SourceMessage,
        progress: Progress<'_>,
    ) -> Result<Vec<u8>, SourceError> {
        progress(4, 4);
        Ok(b"jpeg".to_vec())
    }

    fn poll_events(&mut self) -> Result<Vec<SourceEvent>, SourceError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Text(String),
    Media { caption: Option<String> },
    EditText { outbound: String, text: String },
    EditCaption { outbound: String, text: String },
    Delete(String),
}

/// Bot-API shaped platform that numbers outbound messages from 501.
#[derive(Clone, Default)]
struct RecordingPlatform {
    calls: Arc<Mutex<Vec<Call>>>,
    next: Arc<Mutex<u64>>,
}

impl RecordingPlatform {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn outbound(&self) -> Option<String> {
        let mut next = self.next.lock().unwrap();
        *next += 1;
        Some((500 + *next).to_string())
    }
}

impl SenderAdapter for RecordingPlatform {
    fn platform(&self) -> &str {
        "botapi"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            edit: true,
            delete: true,
            retain_media: false,
        }
    }

    fn send_text(&self, text: &str, _pin: bool) -> Result<Option<String>, SendError> {
        self.record(Call::Text(text.to_string()));
        Ok(self.outbound())
    }

    fn send_media(
        &self,
        _path: &Path,
        caption: Option<&str>,
        _pin: bool,
    ) -> Result<Option<String>, SendError> {
        self.record(Call::Media {
            caption: caption.map(str::to_string),
        });
        Ok(self.outbound())
    }

    fn edit_text(&self, outbound_id: &str, text: &str) -> Result<(), SendError> {
        self.record(Call::EditText {
            outbound: outbound_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    fn edit_caption(&self, outbound_id: &str, caption: &str) -> Result<(), SendError> {
        self.record(Call::EditCaption {
            outbound: outbound_id.to_string(),
            text: caption.to_string(),
        });
        Ok(())
    }

    fn delete_message(&self, outbound_id: &str) -> Result<(), SendError> {
        self.record(Call::Delete(outbound_id.to_string()));
        Ok(())
    }

    fn test_connection(&self) -> Result<(), SendError> {
        Ok(())
    }
}

fn text_message(id: i64, text: &str) -> SourceMessage {
    SourceMessage {
        id,
        date: 1_000 + id,
        edit_date: None,
        text: Some(text.to_string()),
        grouped_id: None,
        media: None,
        reply_to_msg_id: None,
        reply_to_top_id: None,
        pinned: false,
    }
}

fn album_photo(id: i64, grouped_id: i64, caption: Option<&str>) -> SourceMessage {
    SourceMessage {
        date: 2_000,
        text: caption.map(str::to_string),
        grouped_id: Some(grouped_id),
        media: Some(SourceMedia {
            kind: MediaKind::Photo,
            file_name: None,
        }),
        ..text_message(id, "")
    }
}

struct Relay {
    _dir: TempDir,
    ingest: IngestEngine<ChannelSource>,
    syncer: PlatformSyncer<RecordingPlatform>,
    platform: RecordingPlatform,
    clock: Instant,
}

impl Relay {
    fn new(source: ChannelSource) -> Self {
        let dir = TempDir::new().expect("storage");
        let store = RecordStore::open(dir.path()).expect("open store");
        let platform = RecordingPlatform::default();
        let syncer = PlatformSyncer::load(
            store.clone(),
            platform.clone(),
            SyncerOptions {
                media_delay: Duration::ZERO,
            },
        )
        .expect("load syncer");
        Self {
            _dir: dir,
            ingest: IngestEngine::new(store, source, WINDOW),
            syncer,
            platform,
            clock: Instant::now(),
        }
    }

    /// Apply `events` together and let any album window close.
    fn ingest(&mut self, events: impl IntoIterator<Item = SourceEvent>) {
        for event in events {
            self.ingest.handle_event(event, self.clock).expect("ingest event");
        }
        self.clock += WINDOW * 2;
        self.ingest.flush_due_groups(self.clock);
    }

    fn sync(&mut self) -> Vec<Call> {
        let before = self.platform.calls().len();
        self.syncer.watch_cycle().expect("watch cycle");
        self.platform.calls()[before..].to_vec()
    }

    fn store(&self) -> &RecordStore {
        self.ingest.store()
    }
}

#[test]
fn deleting_a_delivered_message_deletes_it_downstream() {
    let hello = text_message(1, "hello");
    let mut relay = Relay::new(ChannelSource::with(&[hello.clone()]));
    relay.syncer.catch_up().expect("catch up");

    relay.ingest([SourceEvent::New { message: hello }]);
    assert_eq!(relay.sync(), vec![Call::Text("hello".into())]);
    assert!(!relay.store().contains(&PostId::Message(1)));

    relay.ingest([SourceEvent::Deleted { ids: vec![1] }]);
    assert_eq!(relay.sync(), vec![Call::Delete("501".into())]);
    assert!(relay.syncer.ledger().get(&PostId::Message(1)).unwrap().deleted);

    assert!(relay.sync().is_empty(), "delete is issued once");
    assert!(!relay.store().contains(&PostId::Message(1)));
}

#[test]
fn deleting_one_album_member_deletes_every_delivered_item() {
    let first = album_photo(10, 7, Some("album caption"));
    let second = album_photo(11, 7, None);
    let mut relay = Relay::new(ChannelSource::with(&[first.clone(), second.clone()]));
    relay.syncer.catch_up().expect("catch up");

    relay.ingest([
        SourceEvent::New { message: first },
        SourceEvent::New { message: second },
    ]);
    assert_eq!(
        relay.sync(),
        vec![
            Call::Media {
                caption: Some("album caption".into())
            },
            Call::Media { caption: None },
        ]
    );
    assert!(!relay.store().contains(&PostId::Group(7)));

    relay.ingest([SourceEvent::Deleted { ids: vec![11] }]);
    assert_eq!(
        relay.sync(),
        vec![Call::Delete("501".into()), Call::Delete("502".into())]
    );
    assert!(relay.sync().is_empty());
}

#[test]
fn editing_uncaptioned_album_member_keeps_the_album_caption() {
    let first = album_photo(10, 7, Some("album caption"));
    let second = album_photo(11, 7, None);
    let mut relay = Relay::new(ChannelSource::with(&[first.clone(), second.clone()]));
    relay.syncer.catch_up().expect("catch up");
    relay.ingest([
        SourceEvent::New { message: first },
        SourceEvent::New { message: second.clone() },
    ]);
    relay.sync();

    let mut edited = second;
    edited.edit_date = Some(2_200);
    relay.ingest([SourceEvent::Edited { message: edited }]);

    let record = relay.store().get(&PostId::Group(7)).unwrap().unwrap();
    assert_eq!(record.child_messages, vec![10, 11]);
    assert_eq!(
        relay.sync(),
        vec![Call::EditCaption {
            outbound: "501".into(),
            text: "album caption".into()
        }]
    );
    assert_eq!(
        relay.syncer.ledger().get(&PostId::Group(7)).unwrap().edit_date,
        Some(2_200)
    );
}

#[test]
fn delete_of_never_delivered_id_is_dropped() {
    let mut relay = Relay::new(ChannelSource::default());
    relay.syncer.catch_up().expect("catch up");

    relay.ingest([SourceEvent::Deleted { ids: vec![99] }]);
    assert!(relay.store().contains(&PostId::Message(99)));

    let report = match relay.syncer.watch_cycle().expect("watch cycle") {
        CycleOutcome::Processed(report) => report,
        other => panic!("expected a processed cycle, got {other:?}"),
    };
    assert_eq!(report.discarded, 1);
    assert!(relay.platform.calls().is_empty());
    assert!(!relay.store().contains(&PostId::Message(99)));
    assert!(relay.syncer.ledger().get(&PostId::Message(99)).is_none());
}

#[test]
fn edited_text_message_is_edited_in_place() {
    let hello = text_message(3, "hello");
    let mut relay = Relay::new(ChannelSource::with(&[hello.clone()]));
    relay.syncer.catch_up().expect("catch up");
    relay.ingest([SourceEvent::New { message: hello.clone() }]);
    relay.sync();

    let mut edited = hello;
    edited.text = Some("hello, world".into());
    edited.edit_date = Some(1_500);
    relay.ingest([SourceEvent::Edited { message: edited }]);

    assert_eq!(
        relay.sync(),
        vec![Call::EditText {
            outbound: "501".into(),
            text: "hello, world".into()
        }]
    );
    let entry = relay.syncer.ledger().get(&PostId::Message(3)).unwrap();
    assert_eq!(entry.edit_date, Some(1_500));
    assert_eq!(
        relay.syncer.sender().calls().first(),
        Some(&Call::Text("hello".into()))
    );
}
