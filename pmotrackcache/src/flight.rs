//! Déduplication des téléchargements concurrents (singleflight)
//!
//! Le premier appelant pour un identifiant lance le travail dans une tâche
//! Tokio détachée et enregistre une poignée partagée ; les appelants suivants
//! attendent cette même poignée. L'abandon d'un appelant (client HTTP
//! déconnecté) n'annule donc jamais le travail. La tâche retire elle-même son
//! entrée du registre en fin d'exécution, succès, échec ou panique.

use crate::error::{Error, Result};
use crate::track_id::TrackId;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

type SharedFlight<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<Error>>>>;
type Registry<T> = Arc<Mutex<HashMap<TrackId, SharedFlight<T>>>>;

/// Registre des opérations en cours, indexé par identifiant
pub struct FlightGroup<T> {
    flights: Registry<T>,
}

impl<T> Default for FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TrackId, SharedFlight<T>>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Vrai si une opération est en cours pour `id`
    pub fn contains(&self, id: &TrackId) -> bool {
        self.lock().contains_key(id)
    }

    /// Nombre d'opérations en cours
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exécute `work` une seule fois pour `id` parmi les appelants concurrents
    ///
    /// `work` n'est appelé que par le premier appelant. Tous reçoivent le même
    /// résultat ; l'erreur est partagée sous forme d'`Arc`.
    pub async fn run<F, Fut>(&self, id: &TrackId, work: F) -> std::result::Result<T, Arc<Error>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let flight = {
            let mut flights = self.lock();
            match flights.get(id) {
                Some(existing) => {
                    debug!(id = %id, "Joining in-flight operation");
                    existing.clone()
                }
                None => {
                    let guard = FlightGuard {
                        registry: Arc::clone(&self.flights),
                        id: id.clone(),
                    };
                    let work = work();
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        work.await.map_err(Arc::new)
                    });

                    let flight: SharedFlight<T> = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => Err(Arc::new(Error::other(format!(
                                "flight task failed: {}",
                                e
                            )))),
                        }
                    }
                    .boxed()
                    .shared();

                    flights.insert(id.clone(), flight.clone());
                    flight
                }
            }
        };

        flight.await
    }
}

/// Retire l'entrée du registre quand la tâche se termine
struct FlightGuard<T> {
    registry: Registry<T>,
    id: TrackId,
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
