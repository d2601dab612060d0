//! Test data builders for creating test entities

use chrono::{DateTime, Duration, Utc};
use jobstore_domain::{
    JobDetail, JobKey, MisfireInstruction, Schedule, Trigger, TriggerKey, DEFAULT_GROUP,
};

/// Builder for creating test JobDetail entities
pub struct JobBuilder {
    job: JobDetail,
}

impl JobBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            job: JobDetail::new(JobKey::new(name, DEFAULT_GROUP), "test.NoopJob"),
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.job.key.group = group.to_string();
        self
    }

    pub fn with_job_type(mut self, job_type: &str) -> Self {
        self.job.job_type = job_type.to_string();
        self
    }

    pub fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.job.job_data.insert(key.to_string(), value);
        self
    }

    pub fn durable(mut self) -> Self {
        self.job.durable = true;
        self
    }

    pub fn stateful(mut self) -> Self {
        self.job.stateful = true;
        self
    }

    pub fn build(self) -> JobDetail {
        self.job
    }
}

/// Builder for creating test Trigger entities
///
/// 默认是一次性触发器，开始时间为当前时间前一秒，因此立即到期。
pub struct TriggerBuilder {
    key: TriggerKey,
    job_key: JobKey,
    schedule: Schedule,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    priority: Option<i32>,
    misfire_instruction: MisfireInstruction,
    calendar_name: Option<String>,
}

impl TriggerBuilder {
    pub fn new(name: &str, job: &JobDetail) -> Self {
        Self {
            key: TriggerKey::new(name, job.key.group.clone()),
            job_key: job.key.clone(),
            schedule: Schedule::once(),
            start_time: Utc::now() - Duration::seconds(1),
            end_time: None,
            priority: None,
            misfire_instruction: MisfireInstruction::Smart,
            calendar_name: None,
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.key.group = group.to_string();
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn starting_at(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    /// 相对当前时间偏移的开始时间，负数表示过去
    pub fn starting_in(self, offset: Duration) -> Self {
        self.starting_at(Utc::now() + offset)
    }

    pub fn ending_at(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: MisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    pub fn with_calendar(mut self, calendar_name: &str) -> Self {
        self.calendar_name = Some(calendar_name.to_string());
        self
    }

    pub fn build(self) -> Trigger {
        let mut trigger = Trigger::new(self.key, self.job_key, self.schedule, self.start_time)
            .with_misfire_instruction(self.misfire_instruction);
        if let Some(end_time) = self.end_time {
            trigger = trigger.with_end_time(end_time);
        }
        if let Some(priority) = self.priority {
            trigger = trigger.with_priority(priority);
        }
        if let Some(calendar_name) = self.calendar_name {
            trigger = trigger.with_calendar(calendar_name);
        }
        trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_defaults() {
        let job = JobBuilder::new("report").with_group("batch").stateful().build();
        assert_eq!(job.key, JobKey::new("report", "batch"));
        assert!(job.stateful);
        assert!(!job.durable);

        let trigger = TriggerBuilder::new("t1", &job).with_priority(9).build();
        assert_eq!(trigger.key.group, "batch");
        assert_eq!(trigger.job_key, job.key);
        assert_eq!(trigger.priority, 9);
        assert!(trigger.next_fire_time.is_some());
        assert!(trigger.next_fire_time.unwrap() <= Utc::now());
    }
}
