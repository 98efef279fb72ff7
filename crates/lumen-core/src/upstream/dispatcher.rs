//! Bounded-retry dispatch loop.
//!
//! One dispatcher serves one chain. Per request it resolves the selector for
//! the primary method, then draws targets until a healthy response arrives,
//! the candidate pool is exhausted, or the attempt budget runs out. Failed
//! candidates are excluded from subsequent draws; every exchange outcome is
//! folded back into the target's health state.
//!
//! Cancellation is first-class: the loop checks the request token before
//! each attempt and races it against the in-flight upstream call, so a
//! cancelled request never leaves work behind.

use bytes::Bytes;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    chain::solana,
    metrics,
    proxy::{context::RequestContext, errors::ProxyError},
    upstream::{
        analysis::{analyze_response, ResponseAnalysis},
        http_client::{HttpClient, TransportError},
        router::{MethodRouter, MethodTargetInfo},
        slots::SlotTracker,
        target::Target,
    },
};

/// Upper bound on upstream requests spent on one client request.
pub const MAX_ATTEMPTS: usize = 10;

/// Target-type tag reported to observability.
pub const UNIFIED_TRANSPORT: &str = "unified_transport";

/// Kept in reserve so the final attempt can surface before the outer
/// framework deadline fires.
const DEADLINE_SLACK: Duration = Duration::from_secs(1);

pub struct Dispatcher {
    router: Arc<MethodRouter>,
    http_client: Arc<HttpClient>,
    slots: Arc<SlotTracker>,
    max_attempts: usize,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        router: Arc<MethodRouter>,
        http_client: Arc<HttpClient>,
        slots: Arc<SlotTracker>,
    ) -> Self {
        Self { router, http_client, slots, max_attempts: MAX_ATTEMPTS }
    }

    #[must_use]
    pub fn router(&self) -> &Arc<MethodRouter> {
        &self.router
    }

    /// Proxies one prepared request, returning the upstream body and status.
    ///
    /// # Errors
    ///
    /// Returns a [`ProxyError`] when no route exists, every candidate is
    /// exhausted, the attempt budget runs out, or the request is cancelled.
    pub async fn send_request(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<(Bytes, u16), ProxyError> {
        let started = Instant::now();
        ctx.set_target_type(UNIFIED_TRANSPORT);

        let result = self.execute_with_retries(ctx).await;

        ctx.set_response_time_ms(started.elapsed().as_millis() as i64);
        if !matches!(result, Err(ProxyError::Cancelled)) {
            ctx.set_has_error(result.is_err());
        }
        result
    }

    async fn execute_with_retries(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<(Bytes, u16), ProxyError> {
        if ctx.methods.is_empty() {
            return Err(ProxyError::InvalidRequest("no methods in request".to_string()));
        }

        let primary = ctx.primary_method().to_string();
        let info = self
            .router
            .selector_for_method(&primary)
            .filter(|info| info.is_available())
            .ok_or_else(|| ProxyError::NoRouteForMethod(primary.clone()))?;

        let is_das = solana::is_das_method(&primary);
        let methods = ctx.methods.clone();
        let mut exclude: Vec<usize> = Vec::new();
        let mut attempts = 0usize;
        let mut pool_exhausted = false;

        while attempts < self.max_attempts {
            if ctx.is_cancelled() {
                ctx.set_attempts(attempts);
                return Err(self.cancellation_error(ctx));
            }

            let Some((target, index)) = self.pick_candidate(info, &mut exclude, ctx) else {
                pool_exhausted = true;
                break;
            };
            ctx.set_provider(target.provider());

            let attempt_started = Instant::now();
            let send = self.http_client.post(
                target.url(),
                ctx.body.clone(),
                attempt_timeout(ctx),
                &ctx.forwarded,
            );
            let outcome = tokio::select! {
                () = ctx.cancellation_token().cancelled() => Err(TransportError::Cancelled),
                result = send => result,
            };
            let elapsed_ms = attempt_started.elapsed().as_millis() as i64;
            attempts += 1;

            match outcome {
                Err(err) => {
                    let blameless = err.is_node_blameless(ctx.deadline_expired());
                    if err.is_muted() {
                        tracing::debug!(
                            request_id = %ctx.request_id,
                            error = %err,
                            "upstream request failed"
                        );
                    } else {
                        tracing::error!(
                            request_id = %ctx.request_id,
                            error = %err,
                            "upstream request failed"
                        );
                    }
                    self.apply_outcome(ctx, &target, blameless, &methods, elapsed_ms, 0, None);
                    exclude.push(index);
                }
                Ok((body, status)) => {
                    // DAS nodes speak their own response dialect; hand the
                    // body through once the transport succeeded.
                    if is_das && !body.is_empty() {
                        self.apply_outcome(ctx, &target, true, &methods, elapsed_ms, 0, None);
                        ctx.set_attempts(attempts);
                        return Ok((body, status));
                    }

                    let analysis = analyze_response(&body, &methods);
                    ctx.record_rpc_errors(&analysis.error_codes);
                    for description in &analysis.transient_errors {
                        tracing::error!(
                            request_id = %ctx.request_id,
                            url = %target.url(),
                            error = %description,
                            "upstream response error"
                        );
                    }
                    let slot_reading = self.slot_reading(&analysis);

                    if analysis.user_error {
                        self.apply_outcome(
                            ctx, &target, true, &methods, elapsed_ms, slot_reading, None,
                        );
                        ctx.set_user_error(true);
                        ctx.set_attempts(attempts);
                        return Ok((body, status));
                    }

                    if analysis.node_healthy() {
                        self.apply_outcome(
                            ctx, &target, true, &methods, elapsed_ms, slot_reading, None,
                        );
                        ctx.set_attempts(attempts);
                        return Ok((body, status));
                    }

                    let unavailable = (!analysis.unavailable_methods.is_empty())
                        .then_some(&analysis.unavailable_methods);
                    self.apply_outcome(
                        ctx,
                        &target,
                        false,
                        &methods,
                        elapsed_ms,
                        slot_reading,
                        unavailable,
                    );
                    exclude.push(index);
                }
            }
        }

        ctx.set_attempts(attempts);
        if ctx.is_cancelled() {
            return Err(self.cancellation_error(ctx));
        }
        if pool_exhausted {
            return Err(ProxyError::NoAvailableTargets);
        }
        Err(ProxyError::AttemptsExceeded)
    }

    /// Draws the next eligible target, excluding ineligible candidates as it
    /// goes. Speed- and reliability-class requests take a second draw and
    /// keep the better of the two.
    fn pick_candidate(
        &self,
        info: &MethodTargetInfo,
        exclude: &mut Vec<usize>,
        ctx: &RequestContext,
    ) -> Option<(Arc<Target>, usize)> {
        let estimate = self.slots.estimate();

        loop {
            let (target, index) = info.get_next(exclude).ok()?;
            let eligibility = target.is_eligible(
                &ctx.methods,
                ctx.token_class,
                &estimate,
                ctx.requested_block,
            );
            if !eligibility.eligible {
                exclude.push(index);
                continue;
            }

            if !ctx.token_class.prefers_speed() && !ctx.token_class.prefers_reliability() {
                return Some((target, index));
            }

            let mut shadow = exclude.clone();
            shadow.push(index);
            if let Ok((rival, rival_index)) = info.get_next(&shadow) {
                let rival_eligibility = rival.is_eligible(
                    &ctx.methods,
                    ctx.token_class,
                    &estimate,
                    ctx.requested_block,
                );
                if rival_eligibility.eligible {
                    let rival_wins = if ctx.token_class.prefers_reliability() {
                        rival_eligibility.worst_err_counter < eligibility.worst_err_counter
                    } else {
                        rival_eligibility.worst_avg_response_ms
                            < eligibility.worst_avg_response_ms
                    };
                    if rival_wins {
                        return Some((rival, rival_index));
                    }
                }
            }
            return Some((target, index));
        }
    }

    /// Converts a first-available-slot reading into the node's history-window
    /// size, measured against the extrapolated chain tip.
    fn slot_reading(&self, analysis: &ResponseAnalysis) -> i64 {
        match analysis.first_slot_on_node {
            Some(first_slot) => {
                let tip = self.slots.estimate().extrapolated_tip();
                tip - first_slot as i64
            }
            None => 0,
        }
    }

    fn apply_outcome(
        &self,
        ctx: &RequestContext,
        target: &Target,
        success: bool,
        methods: &[String],
        elapsed_ms: i64,
        slot_reading: i64,
        unavailable: Option<&ahash::AHashSet<String>>,
    ) {
        metrics::record_provider_usage(target.provider(), success);
        metrics::observe_upstream_request(
            &ctx.chain,
            ctx.method_label(),
            success,
            Duration::from_millis(elapsed_ms.max(0) as u64),
        );
        self.router.update_target_stats(
            target,
            success,
            methods,
            elapsed_ms,
            slot_reading,
            unavailable,
        );
    }

    fn cancellation_error(&self, ctx: &RequestContext) -> ProxyError {
        if ctx.cancellation_token().is_cancelled() {
            ProxyError::Cancelled
        } else {
            ProxyError::DeadlineExceeded
        }
    }
}

/// Per-attempt timeout: the remaining request budget minus a slack second,
/// so the response (or its failure) surfaces before the outer deadline.
fn attempt_timeout(ctx: &RequestContext) -> Duration {
    let remaining = ctx.remaining_time();
    if remaining > DEADLINE_SLACK * 2 {
        remaining - DEADLINE_SLACK
    } else {
        remaining
    }
}
