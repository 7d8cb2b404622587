/*
 psbench
 Copyright 2022 Peter Pearson.
 Licensed under the Apache License, Version 2.0 (the "License");
 You may not use this file except in compliance with the License.
 You may obtain a copy of the License at
 http://www.apache.org/licenses/LICENSE-2.0
 Unless required by applicable law or agreed to in writing, software
 distributed under the License is distributed on an "AS IS" BASIS,
 WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 See the License for the specific language governing permissions and
 limitations under the License.
 ---------
*/

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

// returns an Option<> tuple of the u64 value in seconds, plus a human-readable
// string representation of the number with units
pub fn convert_time_period_string_to_seconds(str_val: &str) -> Option<(u64, String)> {
    let last_char = str_val.chars().last()?;
    let value_was_unitless = !last_char.is_alphabetic();

    let number_part = if value_was_unitless { str_val } else { &str_val[..str_val.len() - last_char.len_utf8()] };
    let parse_result = number_part.parse::<u64>().ok()?;

    if parse_result == 0 {
        return None;
    }

    let plural = parse_result != 1;

    // unitless values are assumed to be seconds
    let (mult_to_seconds, unit_name) = match last_char {
        'm' => (60, if plural { "mins" } else { "min" }),
        'h' => (60 * 60, if plural { "hours" } else { "hour" }),
        's' => (1, if plural { "secs" } else { "sec" }),
        _ if value_was_unitless => (1, if plural { "secs" } else { "sec" }),
        _ => return None,
    };

    let human_readable_string = format!("{} {}", parse_result, unit_name);

    return Some((parse_result * mult_to_seconds, human_readable_string));
}

// Formats elapsed seconds as "H:MM:SS", prefixed with "N day(s), " once it goes past a day.
// Fractions of seconds are dropped (not rounded).
pub fn format_elapsed_hms(seconds: f64) -> String {
    let micros = (seconds.max(0.0) * 1_000_000.0).round() as i64;
    let delta = chrono::Duration::microseconds(micros);

    let days = delta.num_days();
    let secs_of_day = delta.num_seconds() - days * SECONDS_PER_DAY;

    let (mm, ss) = (secs_of_day / 60, secs_of_day % 60);
    let (hh, mm) = (mm / 60, mm % 60);

    let hms = format!("{}:{:02}:{:02}", hh, mm, ss);
    if days == 0 {
        return hms;
    }

    format!("{} {}, {}", days, if days == 1 { "day" } else { "days" }, hms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_time_period_string_01_secs() {
        assert_eq!(convert_time_period_string_to_seconds("42"), Some((42, "42 secs".into())));

        assert_eq!(convert_time_period_string_to_seconds("42s"), Some((42, "42 secs".into())));

        assert_eq!(convert_time_period_string_to_seconds("1"), Some((1, "1 sec".into())));
        assert_eq!(convert_time_period_string_to_seconds("5"), Some((5, "5 secs".into())));
    }

    #[test]
    fn test_convert_time_period_string_02_mins() {
        assert_eq!(convert_time_period_string_to_seconds("1m"), Some((60, "1 min".into())));
        assert_eq!(convert_time_period_string_to_seconds("3m"), Some((180, "3 mins".into())));
    }

    #[test]
    fn test_convert_time_period_string_03_hours() {
        assert_eq!(convert_time_period_string_to_seconds("1h"), Some((60 * 60, "1 hour".into())));
        assert_eq!(convert_time_period_string_to_seconds("3h"), Some((180 * 60, "3 hours".into())));
    }

    #[test]
    fn test_convert_time_period_string_04_invalid() {
        assert_eq!(convert_time_period_string_to_seconds("h"), None);
        assert_eq!(convert_time_period_string_to_seconds(""), None);
        assert_eq!(convert_time_period_string_to_seconds("0"), None);
        assert_eq!(convert_time_period_string_to_seconds("5x"), None);
    }

    #[test]
    fn test_format_elapsed_hms_01_under_a_day() {
        assert_eq!(format_elapsed_hms(0.0), "0:00:00");
        assert_eq!(format_elapsed_hms(12.3456), "0:00:12");
        assert_eq!(format_elapsed_hms(59.999), "0:00:59");
        assert_eq!(format_elapsed_hms(3723.0), "1:02:03");
    }

    #[test]
    fn test_format_elapsed_hms_02_days() {
        assert_eq!(format_elapsed_hms(86400.0), "1 day, 0:00:00");
        assert_eq!(format_elapsed_hms(2.0 * 86400.0 + 61.5), "2 days, 0:01:01");
    }
}
