//! Term list, related terms and studies shown next to the views.
//!
//! Like the controller, the catalog performs no I/O: requests come out as
//! [`ListingTicket`]s and their text comes back through [`Catalog::complete`].

use crate::api::{
    parse_related_terms, parse_studies, parse_terms, sort_related, sort_studies, RelatedOrder, RelatedTerm, Study,
    YearOrder,
};
use crate::controller::LoadStatus;
use crate::error::ApiError;
use crate::fetch::{CancelToken, Listing, ListingCompletion, ListingTicket};
use crate::query::{extract_terms, related_terms_url, studies_url, terms_url};

#[derive(Debug)]
struct Panel<T> {
    items: Vec<T>,
    status: LoadStatus,
    generation: u64,
    cancel: Option<CancelToken>,
}

impl<T> Default for Panel<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            status: LoadStatus::Idle,
            generation: 0,
            cancel: None,
        }
    }
}

impl<T> Panel<T> {
    fn supersede(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.generation += 1;
    }

    fn begin(&mut self, listing: Listing, url: String) -> ListingTicket {
        self.supersede();
        let cancel = CancelToken::new();
        self.cancel = Some(cancel.clone());
        self.status = LoadStatus::Loading;
        ListingTicket {
            listing,
            generation: self.generation,
            url,
            cancel,
        }
    }

    fn clear(&mut self) {
        self.supersede();
        self.items.clear();
        self.status = LoadStatus::Idle;
    }

    fn abandon(&mut self) {
        self.supersede();
        if self.status.is_loading() {
            self.status = LoadStatus::Idle;
        }
    }

    fn is_current(&self, ticket: &ListingTicket) -> bool {
        ticket.generation == self.generation && self.status.is_loading()
    }

    fn publish(&mut self, listing: Listing, result: Result<Vec<T>, String>) {
        self.cancel = None;
        match result {
            Ok(items) => {
                log::debug!("{listing}: {} entries", items.len());
                self.items = items;
                self.status = LoadStatus::Loaded;
            }
            Err(msg) => {
                log::warn!("{listing} request failed: {msg}");
                self.items.clear();
                self.status = LoadStatus::Failed(msg);
            }
        }
    }
}

pub struct Catalog {
    api_base: String,
    terms: Panel<String>,
    studies: Panel<Study>,
    related: Panel<RelatedTerm>,
    related_target: Option<String>,
    year_order: YearOrder,
    related_order: RelatedOrder,
}

impl Catalog {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            terms: Panel::default(),
            studies: Panel::default(),
            related: Panel::default(),
            related_target: None,
            year_order: YearOrder::NewestFirst,
            related_order: RelatedOrder::CoCount,
        }
    }

    /// Request the full term list.
    pub fn request_terms(&mut self) -> ListingTicket {
        let url = terms_url(&self.api_base);
        self.terms.begin(Listing::Terms, url)
    }

    /// Follow a new query: refetch its studies and, when the related-terms
    /// target changes, its related terms. An empty query clears both.
    pub fn set_query(&mut self, query: &str) -> Vec<ListingTicket> {
        let query = query.trim();
        let mut tickets = Vec::new();
        if query.is_empty() {
            self.studies.clear();
        } else {
            let url = studies_url(&self.api_base, query);
            tickets.push(self.studies.begin(Listing::Studies, url));
        }

        let candidates = extract_terms(query);
        let keep = self
            .related_target
            .as_ref()
            .is_some_and(|t| candidates.contains(t));
        if !keep {
            match candidates.into_iter().next() {
                Some(first) => tickets.extend(self.select_related_target(&first)),
                None => {
                    self.related_target = None;
                    self.related.clear();
                }
            }
        }
        tickets
    }

    /// Show terms related to `term`. Returns `None` when it is already shown.
    pub fn select_related_target(&mut self, term: &str) -> Option<ListingTicket> {
        if self.related_target.as_deref() == Some(term) {
            return None;
        }
        self.related_target = Some(term.to_string());
        let url = related_terms_url(&self.api_base, term);
        Some(self.related.begin(Listing::RelatedTerms, url))
    }

    /// Publish a finished listing. Returns `false` for a superseded request.
    pub fn complete(&mut self, completion: ListingCompletion) -> bool {
        let ListingCompletion { ticket, result } = completion;
        let listing = ticket.listing;
        let current = match listing {
            Listing::Terms => self.terms.is_current(&ticket),
            Listing::Studies => self.studies.is_current(&ticket),
            Listing::RelatedTerms => self.related.is_current(&ticket),
        };
        if !current {
            log::debug!("discarding stale {listing} request #{}", ticket.generation);
            return false;
        }
        let text = result.map_err(|e| e.to_string());
        match listing {
            Listing::Terms => self.terms.publish(listing, parsed(text, parse_terms)),
            Listing::Studies => {
                let mut result = parsed(text, parse_studies);
                if let Ok(studies) = &mut result {
                    sort_studies(studies, self.year_order);
                }
                self.studies.publish(listing, result);
            }
            Listing::RelatedTerms => {
                let mut result = parsed(text, parse_related_terms);
                if let Ok(related) = &mut result {
                    sort_related(related, self.related_order);
                }
                self.related.publish(listing, result);
            }
        }
        true
    }

    /// Terms containing `filter` (case-insensitive), prefix matches first,
    /// each group in case-insensitive alphabetical order.
    pub fn terms_matching(&self, filter: &str) -> Vec<&str> {
        let needle = filter.trim().to_lowercase();
        let mut matches: Vec<(bool, String, &str)> = self
            .terms
            .items
            .iter()
            .filter_map(|term| {
                let lower = term.to_lowercase();
                lower
                    .contains(&needle)
                    .then(|| (!lower.starts_with(&needle), lower, term.as_str()))
            })
            .collect();
        matches.sort();
        matches.into_iter().map(|(_, _, term)| term).collect()
    }

    pub fn status(&self, listing: Listing) -> &LoadStatus {
        match listing {
            Listing::Terms => &self.terms.status,
            Listing::Studies => &self.studies.status,
            Listing::RelatedTerms => &self.related.status,
        }
    }

    pub fn term_count(&self) -> usize {
        self.terms.items.len()
    }

    pub fn studies(&self) -> &[Study] {
        &self.studies.items
    }

    pub fn related(&self) -> &[RelatedTerm] {
        &self.related.items
    }

    pub fn related_target(&self) -> Option<&str> {
        self.related_target.as_deref()
    }

    pub fn year_order(&self) -> YearOrder {
        self.year_order
    }

    pub fn set_year_order(&mut self, order: YearOrder) {
        self.year_order = order;
        sort_studies(&mut self.studies.items, order);
    }

    pub fn related_order(&self) -> RelatedOrder {
        self.related_order
    }

    pub fn set_related_order(&mut self, order: RelatedOrder) {
        self.related_order = order;
        sort_related(&mut self.related.items, order);
    }

    /// Supersede every listing; late completions are discarded.
    pub fn teardown(&mut self) {
        self.terms.abandon();
        self.studies.abandon();
        self.related.abandon();
    }
}

fn parsed<T>(text: Result<String, String>, parse: fn(&str) -> Result<Vec<T>, ApiError>) -> Result<Vec<T>, String> {
    parse(&text?).map_err(|e| e.to_string())
}
