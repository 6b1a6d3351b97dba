//! Tests for template token substitution.

use chrono::{TimeZone, Utc};
use rstest::{fixture, rstest};

use super::*;
use crate::clock::FixedClock;
use crate::model::Job;
use crate::test_support::{sample_build, sample_release, sample_target};

#[fixture]
fn clock() -> FixedClock {
    FixedClock(
        Utc.with_ymd_and_hms(2018, 3, 7, 12, 15, 30)
            .single()
            .expect("valid timestamp"),
    )
}

#[fixture]
fn release_context(clock: FixedClock) -> TemplateContext {
    let mut release = sample_release("r-1", "b-9", Some(sample_target("t1", "s3")));
    release.application.id = String::from("5678");
    release.application.name = String::from("TestApp");
    release.environment.name = String::from("test");
    TemplateContext::from_job(&Job::Release(release), &clock)
}

#[rstest]
fn renders_application_environment_and_clock(release_context: TemplateContext) {
    assert_eq!(
        release_context.render("$APPID-$APP/$ENV/$DATE_$TIME.zip"),
        "5678-TestApp/test/20180307_121530.zip"
    );
}

#[rstest]
#[case("$JOBID", "r-1")]
#[case("$PUSHID", "r-1")]
#[case("$BUILDID", "b-9")]
#[case("builds/$BUILDID/$JOBID.tgz", "builds/b-9/r-1.tgz")]
#[case("$UNKNOWN/$APP", "$UNKNOWN/TestApp")]
#[case("cost: $5", "cost: $5")]
#[case("trailing$", "trailing$")]
#[case("no tokens", "no tokens")]
fn renders_tokens_and_keeps_unknown(
    release_context: TemplateContext,
    #[case] template: &str,
    #[case] expected: &str,
) {
    assert_eq!(release_context.render(template), expected);
}

#[rstest]
fn build_push_id_renders_empty(clock: FixedClock) {
    let context = TemplateContext::from_job(&Job::Build(sample_build("b-1")), &clock);
    assert_eq!(context.render("[$PUSHID]/$BUILDID"), "[]/b-1");
}
