mod maintenance;
mod worker;


pub(crate) use maintenance::{
    finalize_cancelled_jobs, purge_idempotency_records, reclaim_expired_leases,
};
pub(crate) use worker::claim_and_execute;
