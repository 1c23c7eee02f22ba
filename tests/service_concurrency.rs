use std::{
    sync::{Arc, OnceLock},
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use reqflow::{
    Request, RequestEvent,
    index::MemoryIndex,
    permissions::{GrantPolicy, Identity, PermissionContext, PermissionPolicy},
    registry::RequestTypeRegistry,
    request_type::GENERIC_TYPE_ID,
    service::{RequestSearchParams, RequestsService, ServiceContext, ServiceSettings},
    store::RecordStore,
};
use serde_json::json;
use tempfile::TempDir;

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn context(temp: &TempDir, policy: Arc<dyn PermissionPolicy>) -> TestResult<ServiceContext> {
    Ok(ServiceContext::new(
        Arc::new(RecordStore::open(temp.path().join("records"), 1)?),
        Arc::new(MemoryIndex::new()),
        Arc::new(RequestTypeRegistry::with_defaults()?),
        policy,
        ServiceSettings::default(),
    ))
}

/// Allows everything, but the first comment permission check starts a
/// deletion of the target request on another thread and gives it time to run.
#[derive(Default)]
struct DeleteWhileCommenting {
    requests: OnceLock<RequestsService>,
    target: Mutex<Option<String>>,
    deleter: Mutex<Option<JoinHandle<reqflow::Result<bool>>>>,
}

impl PermissionPolicy for DeleteWhileCommenting {
    fn check(&self, _identity: &Identity, permission: &str, _context: PermissionContext<'_>) -> bool {
        if permission == "create_event_comment" {
            let target = self.target.lock().take();
            if let (Some(id), Some(requests)) = (target, self.requests.get().cloned()) {
                let handle =
                    thread::spawn(move || requests.delete(&Identity::system(), &id, None));
                *self.deleter.lock() = Some(handle);
                thread::sleep(Duration::from_millis(150));
            }
        }
        true
    }
}

#[test]
fn concurrent_request_delete_takes_new_events_with_it() -> TestResult<()> {
    let temp = TempDir::new()?;
    let policy = Arc::new(DeleteWhileCommenting::default());
    let ctx = context(&temp, policy.clone())?;
    let (requests, events) = ctx.services();
    let _ = policy.requests.set(requests.clone());

    let caller = Identity::user("1", vec!["*".into()]);
    let request = requests.create(&caller, GENERIC_TYPE_ID, &json!({"title": "Racy"}))?;
    let request_id = request.request.id.clone();
    *policy.target.lock() = Some(request_id.clone());

    let comment = events.create(
        &caller,
        &request_id,
        &json!({"type": "comment", "content": "landing"}),
    )?;
    let deleter = policy
        .deleter
        .lock()
        .take()
        .ok_or("deletion was never started")?;
    let deleted = deleter.join().map_err(|_| "deleter thread panicked")??;
    assert!(deleted);

    let store = ctx.store();
    assert!(store.get_by_id::<Request>(&request_id, true)?.is_none());
    assert!(store.child_ids::<RequestEvent>(&request_id)?.is_empty());
    assert!(
        store
            .get_by_id::<RequestEvent>(&comment.event.id, true)?
            .is_none()
    );
    Ok(())
}

#[test]
fn index_follows_store_under_concurrent_updates() -> TestResult<()> {
    let temp = TempDir::new()?;
    let ctx = context(&temp, Arc::new(GrantPolicy))?;
    let (requests, _) = ctx.services();
    let admin = Identity::system();
    let created = requests.create(&admin, GENERIC_TYPE_ID, &json!({"title": "start"}))?;
    let id = created.request.id.clone();

    let writers: Vec<_> = (0..8)
        .map(|writer| {
            let requests = requests.clone();
            let id = id.clone();
            thread::spawn(move || -> reqflow::Result<()> {
                let admin = Identity::system();
                for round in 0..25 {
                    requests.update(
                        &admin,
                        &id,
                        &json!({"title": format!("writer {writer} round {round}")}),
                        None,
                    )?;
                }
                Ok(())
            })
        })
        .collect();
    for writer in writers {
        writer.join().map_err(|_| "writer thread panicked")??;
    }

    let stored = ctx
        .store()
        .get_by_id::<Request>(&id, false)?
        .ok_or("request disappeared")?;
    assert_eq!(stored.revision_id, 201);

    let listed = requests.search(&admin, &RequestSearchParams::default())?;
    assert_eq!(listed.total(), 1);
    let indexed = &listed.items()[0].request;
    assert_eq!(indexed.revision_id, stored.revision_id);
    assert_eq!(indexed.title, stored.title);
    Ok(())
}
