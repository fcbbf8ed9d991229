//! Synthetic hourly rental tables shared by the integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub const HEADER: &str = "instant,dteday,season,yr,mnth,hr,holiday,weekday,workingday,weathersit,temp,atemp,hum,windspeed,casual,registered,cnt";

/// One CSV row. Rush hours carry counts above 200, the rest stay below.
pub fn hourly_row(i: usize) -> String {
    let hr = i % 24;
    let season = i % 4 + 1;
    let mnth = i % 12 + 1;
    let holiday = usize::from(i % 15 == 0);
    let weekday = i % 7;
    let workingday = usize::from(holiday == 0 && weekday != 0 && weekday != 6);
    let weathersit = i % 3 + 1;
    let temp = 0.2 + 0.06 * ((i * 7) % 10) as f64;
    let atemp = temp * 0.9;
    let cnt = if (7..=9).contains(&hr) || (16..=19).contains(&hr) {
        250 + i % 50
    } else {
        40 + i % 100
    };
    let casual = cnt / 5;
    format!(
        "{},2011-01-01,{},0,{},{},{},{},{},{},{:.2},{:.4},0.55,0.19,{},{},{}",
        i + 1,
        season,
        mnth,
        hr,
        holiday,
        weekday,
        workingday,
        weathersit,
        temp,
        atemp,
        casual,
        cnt - casual,
        cnt
    )
}

pub fn write_lines(path: &Path, header: &str, rows: impl IntoIterator<Item = String>) -> PathBuf {
    let mut contents = String::from(header);
    contents.push('\n');
    for row in rows {
        contents.push_str(&row);
        contents.push('\n');
    }
    fs::write(path, contents).unwrap();
    path.to_path_buf()
}

/// Write `rows` clean rows to `path`
pub fn write_hourly_csv(path: &Path, rows: usize) -> PathBuf {
    write_lines(path, HEADER, (0..rows).map(hourly_row))
}
