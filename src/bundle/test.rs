use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    bundle::{Bundle, MAX_NESTING_DEPTH},
    error::ErrorKind,
    options::{CountBundle, CountOption},
    test::{MockServer, MockTopology},
    Client,
};

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn render(options: &[CountOption]) -> Vec<String> {
    options.iter().map(ToString::to_string).collect()
}

fn client() -> Client {
    MockTopology::new([MockServer::primary("localhost")]).into_client()
}

fn nest(bundle: CountBundle, levels: usize) -> CountBundle {
    (0..levels).fold(bundle, |inner, _| CountBundle::new().nested(inner))
}

#[test]
fn resolution_preserves_construction_order() {
    let bundle: CountBundle = [
        CountOption::MaxTime(millis(10)),
        CountOption::MaxTime(millis(100)),
    ]
    .into_iter()
    .collect();
    let bundle = bundle.nested(CountBundle::new().max_time(millis(10)));

    let (options, session) = bundle.resolve(false).unwrap();
    assert!(session.is_none());
    assert_eq!(
        render(&options),
        vec!["maxTimeMS: 10ms", "maxTimeMS: 100ms", "maxTimeMS: 10ms"]
    );

    let (options, _) = bundle.resolve(true).unwrap();
    assert_eq!(render(&options), vec!["maxTimeMS: 10ms"]);
}

#[test]
fn nested_bundles_are_spliced_in_place() {
    let inner = CountBundle::new().limit(2).skip(3);
    let bundle = CountBundle::new().skip(1).nested(inner).limit(4);

    let (options, _) = bundle.resolve(false).unwrap();
    assert_eq!(
        render(&options),
        vec!["skip: 1", "limit: 2", "skip: 3", "limit: 4"]
    );

    let (options, _) = bundle.resolve(true).unwrap();
    assert_eq!(render(&options), vec!["skip: 3", "limit: 4"]);
}

#[test]
fn bundles_nested_on_both_sides_flatten_depth_first() {
    let b2 = CountBundle::new()
        .max_time(millis(10))
        .nested(CountBundle::new().max_time(millis(100)));
    let b4 = CountBundle::new()
        .max_time(millis(200))
        .nested(CountBundle::new().max_time(millis(11)));
    let outer = CountBundle::new()
        .nested(b4)
        .max_time(millis(1))
        .nested(b2);

    let (options, _) = outer.resolve(false).unwrap();
    assert_eq!(
        render(&options),
        vec![
            "maxTimeMS: 200ms",
            "maxTimeMS: 11ms",
            "maxTimeMS: 1ms",
            "maxTimeMS: 10ms",
            "maxTimeMS: 100ms",
        ]
    );

    let (options, _) = outer.resolve(true).unwrap();
    assert_eq!(render(&options), vec!["maxTimeMS: 100ms"]);

    let resolved = outer.resolve_options().unwrap().0;
    assert_eq!(resolved.max_time, Some(millis(100)));
}

#[test]
fn dedupe_keeps_survivor_order() {
    let bundle = CountBundle::new()
        .skip(1)
        .comment("first")
        .limit(5)
        .skip(2)
        .comment("second");

    let (options, _) = bundle.resolve(true).unwrap();
    assert_eq!(
        render(&options),
        vec!["limit: 5", "skip: 2", "comment: \"second\""]
    );
}

#[test]
fn nil_entries_are_skipped() {
    let bundle = CountBundle::new()
        .add_optional(None::<CountOption>)
        .skip(1)
        .add_optional(Some(CountOption::Limit(3)))
        .add_optional(None::<CountBundle>);

    assert!(!bundle.is_empty());
    let (options, session) = bundle.resolve(false).unwrap();
    assert!(session.is_none());
    assert_eq!(render(&options), vec!["skip: 1", "limit: 3"]);

    assert!(CountBundle::new().resolve(true).unwrap().0.is_empty());
}

#[test]
fn extending_a_bundle_leaves_it_untouched() {
    let base = CountBundle::new().skip(1);
    let left = base.limit(2);
    let right = base.comment("x");

    assert_eq!(render(&base.resolve(false).unwrap().0), vec!["skip: 1"]);
    assert_eq!(
        render(&left.resolve(false).unwrap().0),
        vec!["skip: 1", "limit: 2"]
    );
    assert_eq!(
        render(&right.resolve(false).unwrap().0),
        vec!["skip: 1", "comment: \"x\""]
    );
}

#[tokio::test]
async fn session_is_extracted_but_not_counted() {
    let client = client();
    let session = client.start_session(None).await.unwrap();

    let bundle = CountBundle::new()
        .nested(CountBundle::new())
        .session(session);

    let (options, session) = bundle.resolve(false).unwrap();
    assert!(options.is_empty());
    assert!(session.is_some());
}

#[tokio::test]
async fn most_recent_session_wins() {
    let client = client();
    let first = crate::SessionRef::new(client.start_session(None).await.unwrap());
    let second = crate::SessionRef::new(client.start_session(None).await.unwrap());

    let bundle = CountBundle::new()
        .session(first.clone())
        .skip(1)
        .nested(CountBundle::new().session(second.clone()));

    let (options, session) = bundle.resolve(true).unwrap();
    assert_eq!(render(&options), vec!["skip: 1"]);
    let session = session.unwrap();
    assert!(session.ptr_eq(&second));
    assert!(!session.ptr_eq(&first));
}

#[test]
fn nesting_depth_is_bounded() {
    let deepest_allowed = nest(CountBundle::new().skip(1), MAX_NESTING_DEPTH);
    let (options, _) = deepest_allowed.resolve(false).unwrap();
    assert_eq!(render(&options), vec!["skip: 1"]);

    let too_deep = nest(CountBundle::new().skip(1), MAX_NESTING_DEPTH + 1);
    let error = too_deep.resolve(false).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));

    // The failure surfaces through every enclosing bundle.
    let enclosing = CountBundle::new().limit(1).nested(too_deep);
    assert!(enclosing.resolve(true).is_err());
    assert!(enclosing.resolve_options().is_err());
}

#[test]
fn display_renders_what_it_can() {
    let bundle = CountBundle::new()
        .skip(1)
        .nested(nest(CountBundle::new().limit(2), MAX_NESTING_DEPTH + 1))
        .max_time(millis(5));

    assert!(bundle.resolve(false).is_err());
    assert_eq!(bundle.to_string(), "skip: 1\nmaxTimeMS: 5ms");
}

#[tokio::test]
async fn concurrent_resolution_agrees() {
    let bundle = CountBundle::new()
        .skip(1)
        .nested(CountBundle::new().limit(2).skip(3))
        .max_time(millis(7));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let bundle = bundle.clone();
            tokio::spawn(async move {
                // Extending a shared bundle from several tasks never changes what others see.
                let _extended = bundle.limit(i);
                render(&bundle.resolve(true).unwrap().0)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(
            handle.await.unwrap(),
            vec!["limit: 2", "skip: 3", "maxTimeMS: 7ms"]
        );
    }
}

#[test]
fn typed_resolution_folds_left_to_right() {
    let (options, _) = Bundle::<CountOption>::new()
        .limit(10)
        .nested(CountBundle::new().limit(20).skip(2))
        .resolve_options()
        .unwrap();
    assert_eq!(options.limit, Some(20));
    assert_eq!(options.skip, Some(2));
}
