use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::data_models::CrawlResult;
use crate::error::FetchError;
use crate::fetcher::Fetcher;

/// Anything that can turn one URL into a `CrawlResult`. `Fetcher` is the real one;
/// tests plug in fakes.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> CrawlResult;
}

#[async_trait::async_trait]
impl PageFetcher for Fetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> CrawlResult {
        Fetcher::fetch(self, url, cancel).await
    }
}

type Job = (usize, String);

/// Fixed-size worker pool over a `PageFetcher`.
///
/// Jobs go through a bounded queue, completions come back on a multi-producer
/// channel, and the `JoinSet` is the barrier: the result stream only closes after
/// every worker has drained the queue and dropped its sender.
pub struct Crawler<F: PageFetcher = Fetcher> {
    fetcher: Arc<F>,
    max_workers: usize,
}

impl<F: PageFetcher> Crawler<F> {
    pub fn new(fetcher: F, max_workers: usize) -> Crawler<F> {
        Crawler {
            fetcher: Arc::new(fetcher),
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Crawls every URL and returns exactly one result per input, in completion order.
    /// Callers de-duplicate beforehand.
    pub async fn crawl_all(&self, urls: Vec<String>, cancel: &CancellationToken) -> Vec<CrawlResult> {
        if urls.is_empty() {
            return Vec::new();
        }

        let num_workers = self.max_workers.min(urls.len());
        log::info!("crawling {} urls with {num_workers} workers", urls.len());

        let (job_tx, job_rx) = mpsc::channel::<Job>(urls.len());
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, CrawlResult)>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        for (idx, url) in urls.iter().enumerate() {
            // capacity == urls.len(), so this never waits
            if job_tx.send((idx, url.clone())).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let mut workers = JoinSet::new();
        for worker_id in 0..num_workers {
            let fetcher = self.fetcher.clone();
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                Self::run_worker(worker_id, fetcher, job_rx, result_tx, cancel).await;
            });
        }
        drop(result_tx);

        let mut slots: Vec<Option<CrawlResult>> = vec![None; urls.len()];
        let mut order = Vec::with_capacity(urls.len());
        let collector = async {
            while let Some((idx, result)) = result_rx.recv().await {
                if slots[idx].is_none() {
                    order.push(idx);
                }
                slots[idx] = Some(result);
            }
        };
        let barrier = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    log::error!("crawl worker crashed: {e}");
                }
            }
        };
        tokio::join!(collector, barrier);

        // a worker that crashed mid-fetch leaves holes; fill them so nothing is dropped
        let lost: Vec<usize> = (0..slots.len()).filter(|&idx| slots[idx].is_none()).collect();

        let mut results = Vec::with_capacity(urls.len());
        for idx in order {
            if let Some(result) = slots[idx].take() {
                results.push(result);
            }
        }
        for idx in lost {
            let error = if cancel.is_cancelled() {
                FetchError::Cancelled
            } else {
                FetchError::WorkerLost
            };
            results.push(CrawlResult::failure(urls[idx].clone(), error, Duration::ZERO));
        }

        let ok = results.iter().filter(|r| r.is_success()).count();
        log::info!("crawl finished: {ok}/{} succeeded", results.len());
        results
    }

    async fn run_worker(
        worker_id: usize,
        fetcher: Arc<F>,
        job_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
        result_tx: mpsc::UnboundedSender<(usize, CrawlResult)>,
        cancel: CancellationToken,
    ) {
        loop {
            let job = {
                let mut rx = job_rx.lock().await;
                rx.recv().await
            };
            let Some((idx, url)) = job else {
                break;
            };

            let result = if cancel.is_cancelled() {
                CrawlResult::failure(url, FetchError::Cancelled, Duration::ZERO)
            } else {
                log::debug!("worker {worker_id} crawling url: {url}");
                fetcher.fetch(&url, &cancel).await
            };

            if result_tx.send((idx, result)).is_err() {
                log::error!("result channel closed, worker {worker_id} stopping");
                break;
            }
        }
    }
}
