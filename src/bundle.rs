//! Persistent, nestable accumulations of per-call options.
//!
//! A [`Bundle`] is an immutable singly-linked chain: every builder call allocates a new head
//! that points at the previous chain, so a bundle can be shared, extended along several
//! branches and resolved concurrently without copying. Resolution flattens the chain into the
//! order the options were supplied in, splicing nested bundles in place, and extracts at most
//! one session reference.
//!
//! ```rust
//! use std::time::Duration;
//! use mongodb_dispatch::options::{CountBundle, CountOption};
//!
//! let defaults = CountBundle::new().max_time(Duration::from_millis(10));
//! let bundle = CountBundle::new()
//!     .add(CountOption::MaxTime(Duration::from_millis(100)))
//!     .nested(defaults);
//!
//! let (options, session) = bundle.resolve(false).unwrap();
//! assert_eq!(options.len(), 2);
//! assert!(session.is_none());
//! ```

#[cfg(test)]
mod test;

use std::{collections::HashSet, fmt, sync::Arc};

use derive_where::derive_where;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    client::session::ClientSession,
    error::{Error, Result},
};

/// How many bundles may enclose an option before resolution gives up.
pub(crate) const MAX_NESTING_DEPTH: usize = 64;

/// An atomic option that can be accumulated in a [`Bundle`].
///
/// Each option belongs to a closed family (one enum per command) and is identified within that
/// family by its kind, the name of the wire field it sets.
pub trait BundleOption: Clone + fmt::Display + Send + Sync + 'static {
    /// The typed options struct a resolved bundle of this family folds into.
    type Options: Default;

    /// The kind of this option. Two options of the same kind override each other.
    fn kind(&self) -> &'static str;

    /// Writes this option into `options`, validating its value.
    fn apply(self, options: &mut Self::Options) -> Result<()>;
}

/// A shared handle to an explicit [`ClientSession`] carried through a [`Bundle`].
#[derive(Clone, Debug)]
pub struct SessionRef(Arc<Mutex<ClientSession>>);

impl SessionRef {
    /// Wraps `session` so that it can be attached to bundles.
    pub fn new(session: ClientSession) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    /// Waits for exclusive access to the session.
    pub async fn lock(&self) -> MutexGuard<'_, ClientSession> {
        self.0.lock().await
    }

    /// Whether both handles refer to the same session.
    pub fn ptr_eq(&self, other: &SessionRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<ClientSession> for SessionRef {
    fn from(session: ClientSession) -> Self {
        Self::new(session)
    }
}

/// One element of a [`Bundle`].
#[derive(Clone, Debug)]
pub enum BundleEntry<O> {
    /// An ordinary option.
    Option(O),

    /// Another bundle, expanded in place on resolution.
    Nested(Bundle<O>),

    /// A session to run the operation in. Sessions never appear in the resolved option list.
    Session(SessionRef),
}

impl<O> From<Bundle<O>> for BundleEntry<O> {
    fn from(bundle: Bundle<O>) -> Self {
        BundleEntry::Nested(bundle)
    }
}

impl<O> From<SessionRef> for BundleEntry<O> {
    fn from(session: SessionRef) -> Self {
        BundleEntry::Session(session)
    }
}

struct Node<O> {
    /// `None` marks a nil entry, which resolution skips.
    entry: Option<BundleEntry<O>>,
    prev: Option<Arc<Node<O>>>,
}

impl<O> Drop for Node<O> {
    // Unlink iteratively so that dropping a long chain does not recurse once per node.
    fn drop(&mut self) {
        let mut prev = self.prev.take();
        while let Some(node) = prev {
            match Arc::try_unwrap(node) {
                Ok(mut node) => prev = node.prev.take(),
                Err(_) => break,
            }
        }
    }
}

/// An immutable, order-preserving accumulation of options of family `O`.
#[derive_where(Clone, Default)]
pub struct Bundle<O> {
    head: Option<Arc<Node<O>>>,
}

impl<O> Bundle<O> {
    /// Creates an empty bundle.
    pub fn new() -> Self {
        Self { head: None }
    }

    /// Returns a new bundle with `entry` appended. `self` is left untouched.
    pub fn add(&self, entry: impl Into<BundleEntry<O>>) -> Self {
        self.push(Some(entry.into()))
    }

    /// Returns a new bundle with `entry` appended, or with a nil entry if `entry` is `None`.
    pub fn add_optional<E: Into<BundleEntry<O>>>(&self, entry: Option<E>) -> Self {
        self.push(entry.map(Into::into))
    }

    /// Returns a new bundle with all of `bundle`'s entries spliced in at this position.
    pub fn nested(&self, bundle: Bundle<O>) -> Self {
        self.add(BundleEntry::Nested(bundle))
    }

    /// Returns a new bundle that runs its operation in `session`.
    pub fn session(&self, session: impl Into<SessionRef>) -> Self {
        self.add(BundleEntry::Session(session.into()))
    }

    /// Whether no entries, nil or otherwise, were ever added.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn push(&self, entry: Option<BundleEntry<O>>) -> Self {
        Self {
            head: Some(Arc::new(Node {
                entry,
                prev: self.head.clone(),
            })),
        }
    }

    /// The non-nil entries, most recently added first.
    fn entries(&self) -> Entries<'_, O> {
        Entries {
            next: self.head.as_deref(),
        }
    }

    fn count(&self, depth: usize) -> Result<usize> {
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::invalid_argument(format!(
                "option bundles cannot be nested more than {} levels deep",
                MAX_NESTING_DEPTH
            )));
        }
        let mut count = 0;
        for entry in self.entries() {
            match entry {
                BundleEntry::Option(_) => count += 1,
                BundleEntry::Nested(bundle) => count += bundle.count(depth + 1)?,
                BundleEntry::Session(_) => {}
            }
        }
        Ok(count)
    }
}

impl<O: Clone> Bundle<O> {
    /// Writes this bundle's options into `slots` from index `end` backward.
    fn fill(
        &self,
        slots: &mut [Option<O>],
        end: &mut usize,
        session: &mut Option<SessionRef>,
    ) -> Result<()> {
        for entry in self.entries() {
            match entry {
                BundleEntry::Option(option) => {
                    *end = end
                        .checked_sub(1)
                        .ok_or_else(|| Error::internal("bundle changed during resolution"))?;
                    slots[*end] = Some(option.clone());
                }
                BundleEntry::Nested(bundle) => bundle.fill(slots, end, session)?,
                BundleEntry::Session(found) => {
                    if session.is_none() {
                        *session = Some(found.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Collects this bundle's options, oldest first, stopping at the nesting limit.
    fn collect_partial(&self, depth: usize, out: &mut Vec<O>) {
        if depth > MAX_NESTING_DEPTH {
            return;
        }
        let entries: Vec<_> = self.entries().collect();
        for entry in entries.into_iter().rev() {
            match entry {
                BundleEntry::Option(option) => out.push(option.clone()),
                BundleEntry::Nested(bundle) => bundle.collect_partial(depth + 1, out),
                BundleEntry::Session(_) => {}
            }
        }
    }
}

impl<O: BundleOption> Bundle<O> {
    /// Flattens this bundle into its options in the order they were supplied, with nested
    /// bundles expanded in place, plus the first session reference found walking from the most
    /// recent entry.
    ///
    /// With `dedupe`, only the last-specified option of each kind survives; survivors keep
    /// their relative order.
    pub fn resolve(&self, dedupe: bool) -> Result<(Vec<O>, Option<SessionRef>)> {
        let len = self.count(0)?;
        let mut slots: Vec<Option<O>> = (0..len).map(|_| None).collect();
        let mut end = len;
        let mut session = None;
        self.fill(&mut slots, &mut end, &mut session)?;

        let options = slots
            .into_iter()
            .collect::<Option<Vec<O>>>()
            .ok_or_else(|| Error::internal("bundle changed during resolution"))?;

        if !dedupe {
            return Ok((options, session));
        }

        let mut seen = HashSet::new();
        let mut deduped: Vec<O> = options
            .into_iter()
            .rev()
            .filter(|option| seen.insert(option.kind()))
            .collect();
        deduped.reverse();
        Ok((deduped, session))
    }

    /// Resolves this bundle with deduplication and folds the survivors into the family's typed
    /// options struct.
    pub fn resolve_options(&self) -> Result<(O::Options, Option<SessionRef>)> {
        let (options, session) = self.resolve(true)?;
        let mut resolved = O::Options::default();
        for option in options {
            option.apply(&mut resolved)?;
        }
        Ok((resolved, session))
    }
}

impl<O, E> FromIterator<E> for Bundle<O>
where
    E: Into<BundleEntry<O>>,
{
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Bundle::new(), |bundle, entry| bundle.add(entry))
    }
}

impl<O: Clone + fmt::Display> fmt::Display for Bundle<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut options = Vec::new();
        self.collect_partial(0, &mut options);
        for (i, option) in options.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", option)?;
        }
        Ok(())
    }
}

impl<O: fmt::Debug> fmt::Debug for Bundle<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.entries().collect();
        entries.reverse();
        f.debug_list().entries(entries).finish()
    }
}

struct Entries<'a, O> {
    next: Option<&'a Node<O>>,
}

impl<'a, O> Iterator for Entries<'a, O> {
    type Item = &'a BundleEntry<O>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.next?;
            self.next = node.prev.as_deref();
            if let Some(ref entry) = node.entry {
                return Some(entry);
            }
        }
    }
}

/// Implements the conversion into [`BundleEntry`] and a fluent [`Bundle`] setter for each
/// single-field variant of an option family.
macro_rules! bundle_setters {
    (
        $family:ident;
        $(
            $(#[$($attrss:tt)*])*
            $setter:ident => $variant:ident($value_ty:ty),
        )+
    ) => {
        impl From<$family> for $crate::bundle::BundleEntry<$family> {
            fn from(option: $family) -> Self {
                $crate::bundle::BundleEntry::Option(option)
            }
        }

        impl $crate::bundle::Bundle<$family> {
            $(
                $(#[$($attrss)*])*
                pub fn $setter(&self, value: impl Into<$value_ty>) -> Self {
                    self.add($family::$variant(value.into()))
                }
            )+
        }
    };
}
pub(crate) use bundle_setters;
