//! Bounded in-memory record store
//!
//! Ordered, deduplicated append log of captured exchanges. Capacity-bounded
//! with oldest-first eviction; inserts are filtered through configurable
//! allow/deny URL lists and the decryption pipeline. All history lives in
//! memory for the lifetime of the process.

use crate::interceptor::encryption::EncryptionDetector;
use crate::models::{HttpRecord, HttpRequestFilter};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Maximum records retained; the oldest is evicted past this bound
pub const DEFAULT_CAPACITY: usize = 10_000;

pub struct RecordStore {
    records: Mutex<VecDeque<HttpRecord>>,
    capacity: usize,
    /// When non-empty, a record URL must contain one of these substrings
    only_urls: RwLock<Vec<String>>,
    /// When the allow-list is empty, a record URL must contain none of these
    ignored_urls: RwLock<Vec<String>>,
    decryption_enabled: AtomicBool,
    detector: Arc<dyn EncryptionDetector>,
}

impl RecordStore {
    pub fn new(detector: Arc<dyn EncryptionDetector>) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, detector)
    }

    pub fn with_capacity(capacity: usize, detector: Arc<dyn EncryptionDetector>) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            only_urls: RwLock::new(Vec::new()),
            ignored_urls: RwLock::new(Vec::new()),
            decryption_enabled: AtomicBool::new(true),
            detector,
        }
    }

    /// Restrict recording to URLs containing one of these substrings.
    /// A non-empty allow-list takes precedence over the deny-list.
    pub fn set_only_urls(&self, urls: Vec<String>) {
        *self.only_urls.write().expect("filter lock poisoned") = urls;
    }

    /// Exclude URLs containing any of these substrings
    pub fn set_ignored_urls(&self, urls: Vec<String>) {
        *self.ignored_urls.write().expect("filter lock poisoned") = urls;
    }

    pub fn set_decryption_enabled(&self, enabled: bool) {
        self.decryption_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Insert a finalized record.
    ///
    /// Returns false when the record is filtered out: empty URL, allow/deny
    /// list mismatch, or a duplicate request id. Past capacity the single
    /// oldest record is evicted first.
    pub fn insert(&self, mut record: HttpRecord) -> bool {
        if record.url.is_empty() {
            return false;
        }
        if !self.url_passes_filters(&record.url) {
            return false;
        }

        self.run_decryption_pipeline(&mut record);

        let mut records = self.records.lock().expect("record store poisoned");
        if records.len() >= self.capacity {
            records.pop_front();
        }
        if records
            .iter()
            .any(|existing| existing.request_id == record.request_id)
        {
            return false;
        }
        record.index = records.len();
        tracing::debug!(
            url = %record.url,
            status = %record.status_code,
            index = record.index,
            "recorded exchange"
        );
        records.push_back(record);
        true
    }

    fn url_passes_filters(&self, url: &str) -> bool {
        let lowered = url.to_lowercase();
        let only = self.only_urls.read().expect("filter lock poisoned");
        if !only.is_empty() {
            return only.iter().any(|u| lowered.contains(&u.to_lowercase()));
        }
        drop(only);

        let ignored = self.ignored_urls.read().expect("filter lock poisoned");
        !ignored.iter().any(|u| lowered.contains(&u.to_lowercase()))
    }

    /// Ask the detector whether the response bytes look encrypted and, if so,
    /// try a caller-registered custom decryptor first, then the keyed cipher.
    /// Failure is non-fatal: the record keeps its original bytes.
    fn run_decryption_pipeline(&self, record: &mut HttpRecord) {
        if record.response_body.is_empty() || !self.decryption_enabled.load(Ordering::Relaxed) {
            return;
        }
        if !self.detector.is_encrypted(&record.response_body) {
            return;
        }
        record.is_encrypted = true;

        let decrypted = self
            .detector
            .custom_decrypt(&record.response_body, &record.url)
            .or_else(|| {
                self.detector
                    .decryption_key(&record.url)
                    .and_then(|key| self.detector.decrypt(&record.response_body, &key))
            });

        if decrypted.is_none() {
            tracing::debug!(url = %record.url, "encrypted response could not be decrypted");
        }
        record.decrypted_response_body = decrypted;
    }

    /// Back-fill the decrypted body of an already stored record
    pub fn set_decrypted_body(&self, request_id: &str, body: Vec<u8>) -> bool {
        let mut records = self.records.lock().expect("record store poisoned");
        match records.iter_mut().find(|r| r.request_id == request_id) {
            Some(record) => {
                record.decrypted_response_body = Some(body);
                true
            }
            None => false,
        }
    }

    /// Remove every record with this request id
    pub fn remove(&self, request_id: &str) {
        let mut records = self.records.lock().expect("record store poisoned");
        records.retain(|r| r.request_id != request_id);
    }

    /// Clear the store
    pub fn remove_all(&self) {
        self.records.lock().expect("record store poisoned").clear();
    }

    /// Snapshot of the current records in insertion order
    pub fn records(&self) -> Vec<HttpRecord> {
        self.records
            .lock()
            .expect("record store poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Snapshot of the records matching a filter
    pub fn filtered(&self, filter: &HttpRequestFilter) -> Vec<HttpRecord> {
        self.records
            .lock()
            .expect("record store poisoned")
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    pub fn get(&self, request_id: &str) -> Option<HttpRecord> {
        self.records
            .lock()
            .expect("record store poisoned")
            .iter()
            .find(|r| r.request_id == request_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("record store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
