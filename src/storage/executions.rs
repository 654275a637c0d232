use chrono::{DateTime, Utc};
use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::{ExecutionMessage, ExecutionStatus, JobExecution};
use super::tables::*;

impl Database {
    // ========================================================================
    // Job execution operations
    // ========================================================================

    /// Insert a RUNNING execution row for a job, assigning its id.
    pub fn create_execution(
        &self,
        job_name: &str,
        started_at: DateTime<Utc>,
    ) -> Result<JobExecution, DatabaseError> {
        let write_txn = self.begin_write()?;
        let execution = {
            let id = self.next_id(&write_txn, "executions")?;
            let execution = JobExecution {
                id,
                job_name: job_name.to_string(),
                started_at,
                finished_at: None,
                status: ExecutionStatus::Running,
            };
            let mut table = write_txn.open_table(EXECUTIONS)?;
            let data = rmp_serde::to_vec_named(&execution)?;
            table.insert(id, data.as_slice())?;
            execution
        };
        write_txn.commit()?;
        Ok(execution)
    }

    /// Finalize an execution exactly once: only a RUNNING row transitions.
    pub fn finalize_execution(
        &self,
        id: u64,
        status: ExecutionStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        debug_assert!(status != ExecutionStatus::Running);

        let write_txn = self.begin_write()?;

        let existing: Option<JobExecution> = {
            let table = write_txn.open_table(EXECUTIONS)?;
            let got = table.get(id)?;
            match got {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            }
        };

        let updated = match existing {
            Some(mut execution) if execution.status == ExecutionStatus::Running => {
                execution.status = status;
                execution.finished_at = Some(finished_at);
                let data = rmp_serde::to_vec_named(&execution)?;
                let mut table = write_txn.open_table(EXECUTIONS)?;
                table.insert(id, data.as_slice())?;
                true
            }
            _ => false,
        };

        write_txn.commit()?;
        Ok(updated)
    }

    pub fn get_execution(&self, id: u64) -> Result<Option<JobExecution>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(EXECUTIONS)?;
        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Append messages in order after `seq` numbers already assigned by the
    /// caller; all rows of one run commit together.
    pub fn append_messages(&self, messages: &[ExecutionMessage]) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(EXECUTION_MESSAGES)?;
            for message in messages {
                let data = rmp_serde::to_vec_named(message)?;
                table.insert((message.execution_id, message.seq), data.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All messages of an execution in sequence order.
    pub fn messages_for_execution(
        &self,
        execution_id: u64,
    ) -> Result<Vec<ExecutionMessage>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(EXECUTION_MESSAGES)?;

        let mut messages = Vec::new();
        for result in table.range((execution_id, 0)..=(execution_id, u32::MAX))? {
            let (_, value) = result?;
            messages.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(messages)
    }

    /// Executions that finished before the cutoff (retention sweep input).
    pub fn executions_finished_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobExecution>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(EXECUTIONS)?;

        let mut executions = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let execution: JobExecution = rmp_serde::from_slice(value.value())?;
            if execution.status != ExecutionStatus::Running
                && execution.finished_at.map(|f| f < cutoff).unwrap_or(false)
            {
                executions.push(execution);
                if executions.len() >= limit {
                    break;
                }
            }
        }
        Ok(executions)
    }

    /// Remove an execution row and all its messages.
    pub fn delete_execution(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let deleted = {
            let exists = {
                let table = write_txn.open_table(EXECUTIONS)?;
                let got = table.get(id)?;
                got.is_some()
            };
            if exists {
                {
                    let mut table = write_txn.open_table(EXECUTIONS)?;
                    table.remove(id)?;
                }
                let mut messages_table = write_txn.open_table(EXECUTION_MESSAGES)?;
                let keys: Vec<(u64, u32)> = messages_table
                    .range((id, 0)..=(id, u32::MAX))?
                    .map(|r| r.map(|(k, _)| k.value()))
                    .collect::<Result<Vec<_>, _>>()?;
                for key in keys {
                    messages_table.remove(key)?;
                }
            }
            exists
        };

        write_txn.commit()?;
        Ok(deleted)
    }
}
