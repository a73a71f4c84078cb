//! Best-effort enumeration of workloads in a namespace.
//!
//! Only the initial listing can fail the call. A workload whose task,
//! image, or status cannot be fetched is logged and left out; a running
//! workload whose metrics cannot be fetched or decoded is kept with zero
//! usage.

use osd_common::error::{OsdError, Result};
use osd_common::types::{Namespace, ResourceUsage, TaskStatus, WorkloadRecord};
use osd_runtime::client::{RuntimeClient, RuntimeConnector, Task, Workload};
use osd_runtime::metrics;

/// Lists every workload in `namespace` with its status and live usage.
///
/// Records are returned in the runtime's enumeration order.
///
/// # Errors
///
/// Returns an error only if the runtime connection or the listing call fails.
pub fn list_workloads(
    connector: &dyn RuntimeConnector,
    namespace: &Namespace,
) -> Result<Vec<WorkloadRecord>> {
    let client = connector.connect(namespace)?;
    let workloads = client.workloads()?;
    let total = workloads.len();

    let records = workloads
        .iter()
        .fold(Vec::with_capacity(total), |mut records, workload| {
            match snapshot(&*client, workload) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    namespace = %namespace,
                    id = %workload.id,
                    error = %e,
                    "skipping workload"
                ),
            }
            records
        });

    tracing::debug!(namespace = %namespace, total, listed = records.len(), "workloads enumerated");
    Ok(records)
}

/// Builds the record for one workload.
fn snapshot(client: &dyn RuntimeClient, workload: &Workload) -> Result<WorkloadRecord> {
    let task = client.task(workload)?;
    let image = client.image_name(workload)?;
    let status = client.task_status(&task)?;

    let record = WorkloadRecord::new(
        client.namespace().clone(),
        workload.id.clone(),
        image,
        &status,
    );
    if status != TaskStatus::Running {
        return Ok(record);
    }

    match usage(client, &task) {
        Ok(usage) => Ok(record.with_usage(usage)),
        Err(e) => {
            tracing::warn!(
                namespace = %client.namespace(),
                id = %workload.id,
                error = %e,
                "metrics unavailable"
            );
            Ok(record)
        }
    }
}

fn usage(client: &dyn RuntimeClient, task: &Task) -> Result<ResourceUsage> {
    let payload = client.task_metrics(task)?;
    metrics::decode_usage(&payload).map_err(|e| OsdError::MetricsDecode {
        id: task.id.to_string(),
        message: e.to_string(),
    })
}
