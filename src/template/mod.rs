//! Path template tokens such as `$APPID` and `$DATE`.

use crate::clock::Clock;
use crate::model::Job;

/// Values substituted into target path templates for one job.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TemplateContext {
    job_id: String,
    app_id: String,
    app: String,
    env: String,
    date: String,
    time: String,
    build_id: String,
    push_id: String,
}

impl TemplateContext {
    /// Captures token values from `job` and the current time.
    #[must_use]
    pub fn from_job(job: &Job, clock: &dyn Clock) -> Self {
        let now = clock.now();
        Self {
            job_id: job.id().to_owned(),
            app_id: job.application().id.clone(),
            app: job.application().name.clone(),
            env: job.environment().name.clone(),
            date: now.format("%Y%m%d").to_string(),
            time: now.format("%H%M%S").to_string(),
            build_id: job.build_id().to_owned(),
            push_id: job.push_id().unwrap_or_default().to_owned(),
        }
    }

    /// Token table ordered longest first so `$APPID` is never read as `$APP`.
    fn tokens(&self) -> [(&'static str, &str); 8] {
        [
            ("$BUILDID", &self.build_id),
            ("$PUSHID", &self.push_id),
            ("$JOBID", &self.job_id),
            ("$APPID", &self.app_id),
            ("$DATE", &self.date),
            ("$TIME", &self.time),
            ("$APP", &self.app),
            ("$ENV", &self.env),
        ]
    }

    /// Replaces every known token in `template`. Unknown `$WORDS` stay as
    /// written.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        let tokens = self.tokens();
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(position) = rest.find('$') {
            let (head, tail) = rest.split_at(position);
            rendered.push_str(head);
            if let Some((token, value)) = tokens.iter().find(|(token, _)| tail.starts_with(token)) {
                rendered.push_str(value);
                rest = tail.get(token.len()..).unwrap_or_default();
            } else {
                rendered.push('$');
                rest = tail.get(1..).unwrap_or_default();
            }
        }
        rendered.push_str(rest);
        rendered
    }
}

#[cfg(test)]
mod tests;
