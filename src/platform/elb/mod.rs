//! Classic load balancer swap.
//!
//! The target names an active balancer (`elb`) and a passive one
//! (`elb_passive`). Instances behind the passive balancer already run the
//! new release; the swap promotes them into the active balancer and moves
//! the previously active instances behind the passive one.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::{Invocation, Pipeline, PipelineFuture, Services};
use crate::cloud::{CloudError, ElbApi, InstanceHealth};
use crate::events::{
    ERR_DEPLOY_FAILED, ERR_INVALID_PARAMETER, ERR_UNHEALTHY, ERR_WAIT_TIMEOUT, MSG_DEPLOY_SUCCESS,
};
use crate::waiter::{WaitError, Waiter};

struct ElbTarget {
    active: String,
    passive: String,
    elb: Arc<dyn ElbApi>,
}

/// Swaps instances between an active and a passive load balancer.
pub struct ElbPipeline {
    services: Arc<Services>,
    promotion: Waiter,
}

impl ElbPipeline {
    /// Creates the pipeline. Promoted instances are polled every ten
    /// seconds for up to thirty attempts.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            promotion: Waiter::new(Duration::from_secs(10), 30),
        }
    }

    /// Replaces the promotion polling policy.
    #[must_use]
    pub const fn with_promotion_waiter(mut self, waiter: Waiter) -> Self {
        self.promotion = waiter;
        self
    }

    async fn run(&self, invocation: Invocation<'_>) -> bool {
        let Some(target) = self.configure(invocation).await else {
            return false;
        };

        invocation.io.section("Checking passive instances");
        let Some(promoted) = self.check_passive(&target).await else {
            return false;
        };
        invocation
            .io
            .line(&format!("Promoting {}", promoted.join(", ")));

        invocation.io.section("Swapping load balancers");
        if !self.swap(&target, &promoted).await {
            return false;
        }

        invocation.io.section("Verifying active instances");
        self.verify(&target).await
    }

    async fn configure(&self, invocation: Invocation<'_>) -> Option<ElbTarget> {
        let (_, target) = self.services.release(invocation.job)?;
        let active = self.services.require(target, "elb")?;
        let passive = self.services.require(target, "elb_passive")?;
        if active == passive {
            self.services.events.failure(
                ERR_INVALID_PARAMETER,
                json!({"target": target.id, "parameter": "elb_passive", "value": passive}),
            );
            return None;
        }
        let clients = self.services.clients(target).await?;
        Some(ElbTarget {
            active,
            passive,
            elb: clients.elb,
        })
    }

    async fn health(&self, target: &ElbTarget, balancer: &str) -> Option<Vec<InstanceHealth>> {
        match target.elb.instance_health(balancer).await {
            Ok(instances) => Some(instances),
            Err(err) => {
                self.services.cloud_failure("instance_health", &err);
                None
            }
        }
    }

    /// Returns the passive instance ids when all of them are in service.
    async fn check_passive(&self, target: &ElbTarget) -> Option<Vec<String>> {
        let instances = self.health(target, &target.passive).await?;
        if instances.is_empty() || !instances.iter().all(InstanceHealth::is_in_service) {
            self.services.events.failure(
                ERR_UNHEALTHY,
                json!({"balancer": target.passive, "instances": describe(&instances)}),
            );
            return None;
        }
        Some(ids(&instances))
    }

    async fn swap(&self, target: &ElbTarget, promoted: &[String]) -> bool {
        let Some(active_before) = self.health(target, &target.active).await else {
            return false;
        };
        let retired: Vec<String> = ids(&active_before)
            .into_iter()
            .filter(|id| !promoted.contains(id))
            .collect();

        if !self.register(target, &target.active, promoted).await {
            return false;
        }
        if !self.await_promotion(target, promoted).await {
            return false;
        }
        if !retired.is_empty() {
            if !self.register(target, &target.passive, &retired).await {
                return false;
            }
            if !self.deregister(target, &target.active, &retired).await {
                return false;
            }
        }
        self.deregister(target, &target.passive, promoted).await
    }

    async fn register(&self, target: &ElbTarget, balancer: &str, instances: &[String]) -> bool {
        tracing::info!(balancer, ?instances, "registering instances");
        if let Err(err) = target.elb.register_instances(balancer, instances).await {
            self.services.cloud_failure("register_instances", &err);
            return false;
        }
        true
    }

    async fn deregister(&self, target: &ElbTarget, balancer: &str, instances: &[String]) -> bool {
        tracing::info!(balancer, ?instances, "deregistering instances");
        if let Err(err) = target.elb.deregister_instances(balancer, instances).await {
            self.services.cloud_failure("deregister_instances", &err);
            return false;
        }
        true
    }

    async fn await_promotion(&self, target: &ElbTarget, promoted: &[String]) -> bool {
        let elb = target.elb.as_ref();
        let balancer = target.active.as_str();
        let outcome = self
            .promotion
            .wait(move |_| async move {
                let instances = elb.instance_health(balancer).await?;
                let ready = promoted.iter().all(|id| {
                    instances
                        .iter()
                        .any(|health| &health.instance_id == id && health.is_in_service())
                });
                Ok::<_, CloudError>(ready.then_some(()))
            })
            .await;
        match outcome {
            Ok(()) => true,
            Err(WaitError::Timeout { attempts }) => {
                self.services.events.failure(
                    ERR_WAIT_TIMEOUT,
                    json!({"balancer": balancer, "instances": promoted, "attempts": attempts}),
                );
                false
            }
            Err(WaitError::Check(err)) => {
                self.services.cloud_failure("instance_health", &err);
                false
            }
        }
    }

    async fn verify(&self, target: &ElbTarget) -> bool {
        let Some(instances) = self.health(target, &target.active).await else {
            return false;
        };
        if instances.is_empty() || !instances.iter().all(InstanceHealth::is_in_service) {
            self.services.events.failure(
                ERR_DEPLOY_FAILED,
                json!({"balancer": target.active, "instances": describe(&instances)}),
            );
            return false;
        }
        self.services.events.success(
            MSG_DEPLOY_SUCCESS,
            json!({"balancer": target.active, "instances": ids(&instances)}),
        );
        true
    }
}

fn ids(instances: &[InstanceHealth]) -> Vec<String> {
    instances
        .iter()
        .map(|health| health.instance_id.clone())
        .collect()
}

fn describe(instances: &[InstanceHealth]) -> serde_json::Value {
    instances
        .iter()
        .map(|health| json!({"id": health.instance_id, "state": health.state}))
        .collect()
}

impl Pipeline for ElbPipeline {
    fn invoke<'a>(&'a self, invocation: Invocation<'a>) -> PipelineFuture<'a> {
        Box::pin(self.run(invocation))
    }
}

#[cfg(test)]
mod tests;
