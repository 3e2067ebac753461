//! Shared helpers for pipeline integration tests

#![allow(dead_code)] // Not every test target uses every helper

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use url::Url;

use aperture::app::{
    Artifact, ImageRequest, ImageResponse, LoadIntent, LoadOutput, Loader, Pipeline, RequestKey,
    TaskId,
};

/// Loader that records every pipeline call and lets tests finish loads by hand
pub struct ScriptedLoader {
    cache: Mutex<HashMap<RequestKey, ImageResponse>>,
    started: Mutex<Vec<LoadIntent>>,
    stopped: Mutex<Vec<TaskId>>,
    invalidations: AtomicUsize,
    cache_clears: AtomicUsize,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            invalidations: AtomicUsize::new(0),
            cache_clears: AtomicUsize::new(0),
        }
    }

    /// Seed the cache so the next resume for `request` hits the fast path
    pub fn preload(&self, request: &ImageRequest) {
        let response = ImageResponse::from_output(test_output(2, 2));
        self.cache.lock().unwrap().insert(request.key(), response);
    }

    /// Drain and return the intents handed over since the last call
    pub fn take_started(&self) -> Vec<LoadIntent> {
        self.started.lock().unwrap().drain(..).collect()
    }

    /// Number of intents currently waiting to be taken
    pub fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    pub fn stopped_ids(&self) -> Vec<TaskId> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    pub fn cache_clear_count(&self) -> usize {
        self.cache_clears.load(Ordering::SeqCst)
    }
}

impl Loader for ScriptedLoader {
    fn cached_response(&self, key: &RequestKey) -> Option<ImageResponse> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn start_load(&self, intent: LoadIntent) {
        self.started.lock().unwrap().push(intent);
    }

    fn stop_load(&self, id: TaskId) {
        self.stopped.lock().unwrap().push(id);
    }

    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn clear_cache(&self) {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
        self.cache.lock().unwrap().clear();
    }
}

/// Pipeline wired to a [`ScriptedLoader`] and the default affinity thread
pub fn create_test_pipeline() -> (Pipeline, Arc<ScriptedLoader>) {
    let loader = Arc::new(ScriptedLoader::new());
    let pipeline = Pipeline::builder()
        .loader(Arc::clone(&loader) as Arc<dyn Loader>)
        .build()
        .unwrap();
    (pipeline, loader)
}

pub fn test_request(path: &str) -> ImageRequest {
    let url = Url::parse(&format!("https://images.example.com/{path}")).unwrap();
    ImageRequest::new(url)
}

pub fn test_output(width: u32, height: u32) -> LoadOutput {
    let pixels = (width * height) as usize;
    LoadOutput::new(Artifact::new(vec![0xCC; pixels], width, height))
}
