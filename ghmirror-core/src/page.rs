//! Pull-based pagination over newest-first listings.
//!
//! The continuation token is the opaque next-page URL from the `Link`
//! response header, so a scan can be paused and resumed across process
//! restarts by persisting the token.

/// Opaque continuation token (the next-page URL)
pub type PageToken = String;

/// A single page request issued to the API boundary.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub per_page: u32,
    pub token: Option<PageToken>,
}

/// One fetched page of raw records plus the continuation token, if any.
#[derive(Debug, Clone)]
pub struct RawPage<T> {
    pub records: Vec<T>,
    pub next: Option<PageToken>,
}

impl<T> RawPage<T> {
    pub fn last(records: Vec<T>) -> Self {
        RawPage {
            records,
            next: None,
        }
    }
}

/// Drives a newest-first page sequence: the caller asks for the next
/// request, fetches it, and feeds the page back through [`accept`].
///
/// The stop predicate ends the scan early: records arrive newest first, so
/// once the oldest record on a page satisfies the predicate every record on
/// any deeper page would too, and those pages are never fetched. The
/// boundary page itself is still returned in full.
///
/// [`accept`]: Paginator::accept
pub struct Paginator<T> {
    per_page: u32,
    token: Option<PageToken>,
    started: bool,
    done: bool,
    stop_when: Option<Box<dyn Fn(&T) -> bool + Send + Sync>>,
}

impl<T> Paginator<T> {
    pub fn new(per_page: u32) -> Self {
        Paginator {
            per_page,
            token: None,
            started: false,
            done: false,
            stop_when: None,
        }
    }

    /// Resume an interrupted scan from a persisted continuation token.
    pub fn resume_from(per_page: u32, token: PageToken) -> Self {
        Paginator {
            per_page,
            token: Some(token),
            started: false,
            done: false,
            stop_when: None,
        }
    }

    pub fn with_stop_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.stop_when = Some(Box::new(predicate));
        self
    }

    /// Next request to issue, or `None` once the sequence is exhausted.
    pub fn next_request(&mut self) -> Option<PageRequest> {
        if self.done {
            return None;
        }
        if self.started && self.token.is_none() {
            self.done = true;
            return None;
        }
        self.started = true;
        Some(PageRequest {
            per_page: self.per_page,
            token: self.token.clone(),
        })
    }

    /// Feed back a fetched page; returns its records.
    pub fn accept(&mut self, page: RawPage<T>) -> Vec<T> {
        self.token = page.next;
        if self.token.is_none() {
            self.done = true;
        }
        if let Some(stop) = &self.stop_when {
            // Newest-first ordering: the last record is the oldest on the page.
            if page.records.last().map(|r| stop(r)).unwrap_or(false) {
                self.done = true;
            }
        }
        page.records
    }

    /// Token to persist so an unfinished scan can resume later.
    /// `None` once the scan has completed.
    pub fn resume_token(&self) -> Option<&str> {
        if self.done {
            None
        } else {
            self.token.as_deref()
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(records: Vec<i64>, next: Option<&str>) -> RawPage<i64> {
        RawPage {
            records,
            next: next.map(String::from),
        }
    }

    fn drive(pages: Vec<RawPage<i64>>, boundary: Option<i64>) -> (Vec<i64>, usize) {
        let mut p = Paginator::new(3);
        if let Some(b) = boundary {
            p = p.with_stop_when(move |r: &i64| *r <= b);
        }
        let mut fetched = 0;
        let mut out = Vec::new();
        while let Some(req) = p.next_request() {
            let idx = req
                .token
                .as_deref()
                .map(|t| t.parse::<usize>().unwrap())
                .unwrap_or(0);
            fetched += 1;
            out.extend(p.accept(pages[idx].clone()));
        }
        (out, fetched)
    }

    #[test]
    fn walks_all_pages_without_predicate() {
        let pages = vec![
            page(vec![50, 40, 30], Some("1")),
            page(vec![20, 10], None),
        ];
        let (records, fetched) = drive(pages, None);
        assert_eq!(records, vec![50, 40, 30, 20, 10]);
        assert_eq!(fetched, 2);
    }

    #[test]
    fn stops_after_boundary_page() {
        // Boundary 25: page 1 still has newer records, page 2 is entirely
        // at-or-below the boundary, page 3 must never be fetched.
        let pages = vec![
            page(vec![50, 40, 30], Some("1")),
            page(vec![20, 10], Some("2")),
            page(vec![5], None),
        ];
        let (records, fetched) = drive(pages, Some(25));
        assert_eq!(records, vec![50, 40, 30, 20, 10]);
        assert_eq!(fetched, 2);
    }

    #[test]
    fn stops_on_first_page_when_oldest_record_is_at_boundary() {
        // Boundary 35: 30 <= 35 on page 1, so page 2 must not be fetched.
        let pages = vec![
            page(vec![50, 40, 30], Some("1")),
            page(vec![20, 10], None),
        ];
        let (records, fetched) = drive(pages, Some(35));
        assert_eq!(records, vec![50, 40, 30]);
        assert_eq!(fetched, 1);
    }

    #[test]
    fn empty_first_page_ends_scan() {
        let pages = vec![page(vec![], None)];
        let (records, fetched) = drive(pages, Some(10));
        assert!(records.is_empty());
        assert_eq!(fetched, 1);
    }

    #[test]
    fn resume_token_mid_scan_and_cleared_when_done() {
        let mut p: Paginator<i64> = Paginator::new(3);
        let req = p.next_request().unwrap();
        assert!(req.token.is_none());
        p.accept(page(vec![3, 2, 1], Some("1")));
        assert_eq!(p.resume_token(), Some("1"));

        let req = p.next_request().unwrap();
        assert_eq!(req.token.as_deref(), Some("1"));
        p.accept(page(vec![0], None));
        assert!(p.resume_token().is_none());
        assert!(p.next_request().is_none());
    }

    #[test]
    fn resumes_from_persisted_token() {
        let mut p: Paginator<i64> = Paginator::resume_from(3, "2".into());
        let req = p.next_request().unwrap();
        assert_eq!(req.token.as_deref(), Some("2"));
    }
}
