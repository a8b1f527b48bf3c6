mod common;

use std::sync::Arc;

use common::{coord, manager, query_param, FakeNetwork};
use pin_photos::{
    BatchBuffer, ErrorKind, Flush, HttpError, ImageConfig, ImageFetchCache, LoadOutcome,
    LoadState, LoadStep, MemoryBackend, PageState, PageTotal, SlotId, SlotRequest, SlotUpdate,
    StoreEvent, NO_PHOTOS_MESSAGE,
};

const A: &str = "https://farm.example.com/a.jpg";
const B: &str = "https://farm.example.com/b.jpg";
const C: &str = "https://farm.example.com/c.jpg";
const D: &str = "https://farm.example.com/d.jpg";

fn urls_of<S, Bk>(manager: &pin_photos::PhotoSetManager<S, Bk>, pin: &pin_photos::LatLon) -> Vec<String>
where
    S: pin_photos::PhotoSearch,
    Bk: pin_photos::StoreBackend,
{
    manager
        .photos(pin)
        .into_iter()
        .map(|photo| photo.remote_url)
        .collect()
}

#[tokio::test]
async fn pin_at_10_20_loads_first_page() {
    let network = FakeNetwork::new();
    let mut manager = manager(&network, MemoryBackend::new());
    let pin = coord(10.0, 20.0);
    manager.add_pin(pin).unwrap();
    network.serve_page(1, &[A, B], 3);

    let outcome = manager.ensure_loaded(&pin).await.unwrap();

    assert_eq!(outcome, LoadOutcome::Loaded { count: 2 });
    assert_eq!(manager.store().photo_count(&pin), 2);
    let record = manager.store().pin(&pin).unwrap();
    assert_eq!(record.current_page, PageState::Page(1));
    assert_eq!(record.total_pages, PageTotal::Known(3));

    let request = &network.search_requests()[0];
    assert_eq!(query_param(request, "bbox"), "19.9,9.9,20.1,10.1");
    assert_eq!(query_param(request, "per_page"), "21");
    assert_eq!(query_param(request, "extras"), "url_m");
}

#[tokio::test]
async fn ensure_loaded_twice_fetches_once() {
    let network = FakeNetwork::new();
    let mut manager = manager(&network, MemoryBackend::new());
    let pin = coord(10.0, 20.0);
    manager.add_pin(pin).unwrap();
    network.serve_page(1, &[A], 1);

    manager.ensure_loaded(&pin).await.unwrap();
    let again = manager.ensure_loaded(&pin).await.unwrap();

    assert_eq!(again, LoadOutcome::AlreadyLoaded { count: 1 });
    assert_eq!(network.searched_pages(), vec![1]);
}

#[tokio::test]
async fn listing_is_sorted_by_url_regardless_of_result_order() {
    let network = FakeNetwork::new();
    let mut manager = manager(&network, MemoryBackend::new());
    let pin = coord(48.85, 2.35);
    manager.add_pin(pin).unwrap();
    network.serve_page(1, &[D, B, C, A], 1);

    manager.ensure_loaded(&pin).await.unwrap();

    assert_eq!(urls_of(&manager, &pin), vec![A, B, C, D]);
}

#[tokio::test]
async fn failed_refresh_leaves_pin_empty() {
    let network = FakeNetwork::new();
    let mut manager = manager(&network, MemoryBackend::new());
    let pin = coord(10.0, 20.0);
    manager.add_pin(pin).unwrap();
    network.serve_page(1, &[A], 5);
    network.serve_page(2, &[B, C], 5);
    network.fail_page(
        3,
        HttpError::Timeout {
            timeout_ms: 30_000,
            request_id: "page-3".into(),
        },
    );

    manager.ensure_loaded(&pin).await.unwrap();
    manager.refresh(&pin).await.unwrap();
    assert_eq!(urls_of(&manager, &pin), vec![B, C]);
    assert_eq!(
        manager.store().pin(&pin).unwrap().current_page,
        PageState::Page(2)
    );

    let err = manager.refresh(&pin).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(network.searched_pages(), vec![1, 2, 3]);
    assert_eq!(manager.store().photo_count(&pin), 0);
    assert_eq!(manager.state(&pin), LoadState::Unloaded);
}

#[tokio::test]
async fn refresh_cycles_back_to_first_page() {
    let network = FakeNetwork::new();
    let mut manager = manager(&network, MemoryBackend::new());
    let pin = coord(-33.86, 151.2);
    manager.add_pin(pin).unwrap();
    network.serve_page(1, &[A], 3);
    network.serve_page(2, &[B], 3);
    network.serve_page(3, &[C], 3);

    manager.ensure_loaded(&pin).await.unwrap();
    manager.refresh(&pin).await.unwrap();
    manager.refresh(&pin).await.unwrap();
    assert_eq!(
        manager.store().pin(&pin).unwrap().current_page,
        PageState::Page(3)
    );

    manager.refresh(&pin).await.unwrap();

    assert_eq!(network.searched_pages(), vec![1, 2, 3, 1]);
    assert_eq!(urls_of(&manager, &pin), vec![A]);
}

#[tokio::test]
async fn refresh_produces_one_batch_update() {
    let network = FakeNetwork::new();
    let mut manager = manager(&network, MemoryBackend::new());
    let mut events = manager.store_mut().subscribe();
    let pin = coord(10.0, 20.0);
    manager.add_pin(pin).unwrap();
    network.serve_page(1, &[A, B, C], 2);
    network.serve_page(2, &[D], 2);

    let mut buffer = BatchBuffer::new(pin);
    manager.ensure_loaded(&pin).await.unwrap();
    buffer.absorb_pending(&mut events);
    let Some(Flush::Update(initial)) = buffer.flush() else {
        panic!("expected the initial load as one update");
    };
    assert_eq!(initial.inserted, vec![0, 1, 2]);

    manager.refresh(&pin).await.unwrap();
    // The refresh commits twice: the clear, then the new page.
    assert_eq!(buffer.absorb_pending(&mut events), 2);

    let Some(Flush::Update(update)) = buffer.flush() else {
        panic!("expected a single batch update");
    };
    assert_eq!(update.deleted, vec![0, 1, 2]);
    assert_eq!(update.inserted, vec![0]);
    assert_eq!((update.len_before, update.len_after), (3, 1));
    assert!(buffer.flush().is_none());
}

#[tokio::test]
async fn no_results_is_informational() {
    let network = FakeNetwork::new();
    let mut manager = manager(&network, MemoryBackend::new());
    let pin = coord(0.0, -140.0);
    manager.add_pin(pin).unwrap();
    network.serve_page(1, &[], 0);

    let outcome = manager.ensure_loaded(&pin).await.unwrap();

    assert_eq!(outcome, LoadOutcome::NoPhotosFound);
    assert!(manager.store().pin(&pin).unwrap().total_pages.is_no_results());
    assert!(!NO_PHOTOS_MESSAGE.is_empty());
}

#[tokio::test]
async fn malformed_response_is_a_parse_error() {
    let network = FakeNetwork::new();
    let mut manager = manager(&network, MemoryBackend::new());
    let pin = coord(10.0, 20.0);
    manager.add_pin(pin).unwrap();
    network.serve_raw_page(1, 200, r#"{"photos": {"photo": "nope"}}"#);

    let err = manager.ensure_loaded(&pin).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);

    network.serve_raw_page(1, 200, r#"{"stat": "fail", "code": 100, "message": "Invalid API Key"}"#);
    let err = manager.ensure_loaded(&pin).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(err.to_string().contains("Invalid API Key"));

    network.serve_raw_page(1, 502, "bad gateway");
    let err = manager.ensure_loaded(&pin).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HttpStatus);
    assert_eq!(manager.state(&pin), LoadState::Unloaded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn search_runs_off_the_owner_and_stale_results_are_dropped() {
    let network = FakeNetwork::new();
    let mut manager = manager(&network, MemoryBackend::new());
    let pin = coord(10.0, 20.0);
    manager.add_pin(pin).unwrap();
    network.serve_page(1, &[A, B], 2);

    let LoadStep::Fetch(first) = manager.begin_load(&pin).unwrap() else {
        panic!("expected a fetch");
    };
    let second = manager.begin_refresh(&pin).unwrap();
    assert_eq!(second.page(), 1);

    let search = Arc::clone(manager.search_client());
    let first = tokio::spawn({
        let search = Arc::clone(&search);
        async move { first.execute(search.as_ref()).await }
    });
    let second = tokio::spawn(async move { second.execute(search.as_ref()).await });
    let first = first.await.unwrap();
    let second = second.await.unwrap();

    assert_eq!(
        manager.complete(first).unwrap(),
        pin_photos::FetchResolution::Discarded
    );
    assert_eq!(
        manager.complete(second).unwrap(),
        pin_photos::FetchResolution::Applied(LoadOutcome::Loaded { count: 2 })
    );
    assert_eq!(manager.store().photo_count(&pin), 2);
}

#[tokio::test]
async fn reused_slot_shows_only_the_latest_photo() {
    let network = FakeNetwork::new();
    let mut manager = manager(&network, MemoryBackend::new());
    let pin = coord(10.0, 20.0);
    manager.add_pin(pin).unwrap();
    network.serve_page(1, &[A, B], 1);
    network.serve_image(A, b"bytes-of-a");
    network.serve_image(B, b"bytes-of-b");
    let gate_a = network.hold_image(A);
    manager.ensure_loaded(&pin).await.unwrap();

    let photos = manager.photos(&pin);
    let (x, y) = (&photos[0], &photos[1]);
    let (mut images, mut loaded) =
        ImageFetchCache::new(network.clone(), ImageConfig::default()).unwrap();
    let slot = SlotId(0);

    assert_eq!(images.request(slot, x), SlotRequest::Started);
    tokio::task::yield_now().await;
    assert_eq!(images.request(slot, y), SlotRequest::Started);
    gate_a.add_permits(1);

    let done = loaded.recv().await.unwrap();
    let update = images.complete(done, manager.store_mut()).unwrap();
    assert_eq!(
        update,
        SlotUpdate::Display {
            slot,
            photo: y.id.clone(),
            bytes: bytes::Bytes::from_static(b"bytes-of-b"),
        }
    );

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    while let Ok(late) = loaded.try_recv() {
        assert_eq!(
            images.complete(late, manager.store_mut()).unwrap(),
            SlotUpdate::Stale
        );
    }
    assert!(manager.store().photo(&x.id).unwrap().image_bytes.is_none());
    assert!(manager.store().photo(&y.id).unwrap().has_image());
}

#[tokio::test]
async fn removing_a_pin_drops_its_photos_and_events() {
    let network = FakeNetwork::new();
    let mut manager = manager(&network, MemoryBackend::new());
    let mut events = manager.store_mut().subscribe();
    let keep = coord(1.0, 1.0);
    let drop_me = coord(2.0, 2.0);
    manager.add_pin(keep).unwrap();
    manager.add_pin(drop_me).unwrap();
    network.serve_page(1, &[A], 1);
    manager.ensure_loaded(&drop_me).await.unwrap();
    while events.try_recv().is_ok() {}

    manager.remove_pin(&drop_me).unwrap();

    assert_eq!(manager.pins().len(), 1);
    assert_eq!(manager.store().photo_count(&drop_me), 0);
    assert_eq!(events.try_recv().unwrap(), StoreEvent::PinDeleted(drop_me));
    assert!(events.try_recv().is_err());
}
