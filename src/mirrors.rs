//! Mirror candidate lists for a catalog path.
//!
//! The catalog lives on several hosts at once and any of them may be down,
//! parked, or serving a different layout on a given day. A [`MirrorSet`] lists
//! every host worth trying for one target path, in preference order.

use tracing::{debug, warn};
use url::Url;

use crate::fetch::{FetchResponse, Fetcher, FormPayload, fetch_following};

/// A mirror that answered usefully, committed to for the rest of one query.
#[derive(Debug, Clone)]
pub struct Pinned<K, T> {
    pub mirror: Url,
    pub kind: K,
    pub value: T,
}

/// Tries `candidates` strictly in order and returns the first one whose
/// response `accept` turns into a value. Transport errors and rejected
/// responses move on to the next candidate; exhaustion yields `None`.
pub async fn resolve_mirror<F, K, T, A>(
    fetcher: &F,
    candidates: impl IntoIterator<Item = (Url, K)>,
    form: Option<&FormPayload>,
    mut accept: A,
) -> Option<Pinned<K, T>>
where
    F: Fetcher,
    K: Copy,
    A: FnMut(&Url, K, &FetchResponse) -> Option<T>,
{
    for (candidate, kind) in candidates {
        let response = match fetch_following(fetcher, &candidate, form).await {
            Ok(response) => response,
            Err(error) => {
                warn!(mirror = %candidate, error = %error, "mirror request failed; trying next");
                continue;
            }
        };

        if response.body.trim().is_empty() {
            debug!(mirror = %candidate, "mirror returned an empty body; trying next");
            continue;
        }

        match accept(&candidate, kind, &response) {
            Some(value) => {
                debug!(mirror = %candidate, "pinned mirror for this query");
                return Some(Pinned {
                    mirror: candidate,
                    kind,
                    value,
                });
            }
            None => debug!(mirror = %candidate, "mirror response not usable; trying next"),
        }
    }

    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSet {
    candidates: Vec<Url>,
}

impl MirrorSet {
    /// Builds the candidates for `reference`: the reference itself, the default
    /// mirror, then the known alternates, all rewritten to the reference's path
    /// and query. Entries sharing scheme and host with an earlier one are dropped.
    pub fn for_link(reference: &Url, default_mirror: &Url, alternates: &[Url]) -> Self {
        let mut candidates: Vec<Url> = Vec::with_capacity(alternates.len() + 2);

        let hosts = std::iter::once(reference)
            .chain(std::iter::once(default_mirror))
            .chain(alternates.iter());

        for host in hosts {
            if candidates.iter().any(|known| same_origin(known, host)) {
                continue;
            }

            let mut candidate = host.clone();
            candidate.set_path(reference.path());
            candidate.set_query(reference.query());
            candidate.set_fragment(None);
            candidates.push(candidate);
        }

        Self { candidates }
    }

    /// Candidates tagged with a unit kind, for [`resolve_mirror`].
    pub fn untagged(self) -> impl Iterator<Item = (Url, ())> {
        self.candidates.into_iter().map(|url| (url, ()))
    }
}

impl IntoIterator for MirrorSet {
    type Item = Url;
    type IntoIter = std::vec::IntoIter<Url>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.into_iter()
    }
}

fn same_origin(left: &Url, right: &Url) -> bool {
    left.scheme() == right.scheme() && left.host_str() == right.host_str()
}

/// Strips path, query and fragment, leaving `scheme://host[:port]/`.
pub fn origin_of(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}
