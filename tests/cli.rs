//! Exit codes of the command line.

use anyhow::Result;
use salesflow::testing::{SalesFixture, generated_rows};
use std::process::Command;

fn salesflow() -> Command {
    Command::new(env!("CARGO_BIN_EXE_salesflow"))
}

#[test]
fn run_then_validate_round() -> Result<()> {
    let fx = SalesFixture::new()?;
    fx.write_csv("day.csv", &generated_rows(100, 3))?;
    let seq = fx.output_path("seq.csv");
    let par = fx.output_path("par.csv");

    let status = salesflow().arg("run").arg(fx.data_dir()).arg(&seq).status()?;
    assert!(status.success());
    let status = salesflow()
        .args(["run", "--parallel"])
        .arg(fx.data_dir())
        .arg(&par)
        .status()?;
    assert!(status.success());

    let status = salesflow().arg("validate").arg(&seq).arg(&par).status()?;
    assert_eq!(status.code(), Some(0));
    Ok(())
}

#[test]
fn mismatch_exits_with_one() -> Result<()> {
    let fx = SalesFixture::new()?;
    let a = fx.output_path("a.csv");
    let b = fx.output_path("b.csv");
    std::fs::write(&a, "product_id,record_count\nP1,2\n")?;
    std::fs::write(&b, "product_id,record_count\nP1,3\n")?;

    let out = salesflow().args(["validate", "--all"]).arg(&a).arg(&b).output()?;
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("record_count"));
    Ok(())
}

#[test]
fn fatal_errors_map_to_their_codes() -> Result<()> {
    let fx = SalesFixture::new()?;
    let out = fx.output_path("agg.csv");

    // empty data directory
    let status = salesflow().arg("run").arg(fx.data_dir()).arg(&out).status()?;
    assert_eq!(status.code(), Some(3));

    let mut rows = generated_rows(3, 1);
    rows.push(rows[0].clone().with_price("free"));
    rows.push(rows[1].clone().with_price("free"));
    fx.write_csv("day.csv", &rows)?;
    let status = salesflow().arg("run").arg(fx.data_dir()).arg(&out).status()?;
    assert_eq!(status.code(), Some(6));
    assert!(!out.exists());

    let status = salesflow()
        .args(["run", "--max-rejection-rate", "1.5"])
        .arg(fx.data_dir())
        .arg(&out)
        .status()?;
    assert_eq!(status.code(), Some(2));
    Ok(())
}
