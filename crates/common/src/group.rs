use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Instant;

use crate::analytics::{GroupCounters, RateSampler};
use crate::{ConfigError, MAX_GROUPS, Ring};

/// One plotter cell. Receivers write one per classified packet, plus an
/// idle cell for every tick that saw no traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activity {
    InOrder,
    Gap,
    Duplicate,
    Reorder,
    Delayed,
    Invalid,
    Idle,
    /// Sender only: the datagram could not be transmitted.
    Error,
}

impl Activity {
    pub fn symbol(self) -> char {
        use Activity::*;
        match self {
            InOrder => '.',
            Gap => 'G',
            Duplicate => 'D',
            Reorder => 'R',
            Delayed => 'L',
            Invalid => 'I',
            Idle => ' ',
            Error => 'E',
        }
    }
}

impl Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Activity::*;
        match self {
            InOrder => write!(f, "in-order"),
            Gap => write!(f, "gap"),
            Duplicate => write!(f, "duplicate"),
            Reorder => write!(f, "reorder"),
            Delayed => write!(f, "delayed"),
            Invalid => write!(f, "invalid"),
            Idle => write!(f, "idle"),
            Error => write!(f, "error"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::V4 => write!(f, "IPv4"),
            Family::V6 => write!(f, "IPv6"),
        }
    }
}

/// Parsed `[SOURCE,]GROUP[+NUM]` command line argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupArg {
    pub source: Option<IpAddr>,
    pub group: IpAddr,
    pub num: usize,
}

impl FromStr for GroupArg {
    type Err = ConfigError;

    fn from_str(arg: &str) -> Result<Self, Self::Err> {
        let (addrs, num) = match arg.split_once('+') {
            Some((addrs, num)) => {
                let num = num
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidRange(arg.to_string()))?;
                (addrs, num)
            }
            None => (arg, 1),
        };
        if num < 1 {
            return Err(ConfigError::InvalidRange(arg.to_string()));
        }

        let (source, group) = match addrs.split_once(',') {
            Some((source, group)) => (Some(source.trim()), group.trim()),
            None => (None, addrs.trim()),
        };

        let group = parse_group(group)?;
        let source = source
            .map(|s| {
                s.parse::<IpAddr>()
                    .map_err(|_| ConfigError::InvalidAddress(s.to_string()))
            })
            .transpose()?;

        if let Some(src) = source {
            if Family::of(&src) != Family::of(&group) {
                return Err(ConfigError::FamilyMismatch {
                    src: src.to_string(),
                    group: group.to_string(),
                });
            }
        }

        Ok(GroupArg { source, group, num })
    }
}

impl GroupArg {
    /// Every (source, group) pair this argument stands for.
    pub fn expand(&self) -> Vec<(Option<IpAddr>, IpAddr)> {
        let mut out = Vec::with_capacity(self.num);
        let mut group = self.group;
        for _ in 0..self.num {
            out.push((self.source, group));
            group = next_group(group);
        }
        out
    }
}

fn parse_group(group: &str) -> Result<IpAddr, ConfigError> {
    match group.parse::<IpAddr>() {
        Ok(addr) if addr.is_multicast() => Ok(addr),
        _ => Err(ConfigError::InvalidAddress(group.to_string())),
    }
}

/// IPv4 steps the whole address, IPv6 only the low 32 bits.
fn next_group(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4).wrapping_add(1))),
        IpAddr::V6(v6) => {
            let mut octets = v6.octets();
            let low = u32::from_be_bytes([octets[12], octets[13], octets[14], octets[15]]);
            octets[12..16].copy_from_slice(&low.wrapping_add(1).to_be_bytes());
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    }
}

/// Builds the group list from command line arguments. No arguments means
/// the default group.
pub fn expand_groups(
    args: &[String],
    port: u16,
    history: usize,
) -> Result<Vec<Group>, ConfigError> {
    let parsed = if args.is_empty() {
        vec![crate::DEFAULT_GROUP.parse::<GroupArg>()?]
    } else {
        args.iter()
            .map(|arg| arg.parse::<GroupArg>())
            .collect::<Result<Vec<_>, _>>()?
    };

    let total = parsed
        .iter()
        .try_fold(0usize, |total, arg| total.checked_add(arg.num));
    if total.is_none_or(|total| total > MAX_GROUPS) {
        return Err(ConfigError::TooManyGroups { max: MAX_GROUPS });
    }

    Ok(parsed
        .iter()
        .flat_map(|arg| arg.expand())
        .map(|(source, group)| Group::new(source, group, port, history))
        .collect())
}

/// Address families in use, in order of first appearance.
pub fn families(groups: &[Group]) -> Vec<Family> {
    let mut families = Vec::with_capacity(2);
    for group in groups {
        let family = group.family();
        if !families.contains(&family) {
            families.push(family);
        }
    }
    families
}

/// One (source, group, port) under test and everything we know about it.
#[derive(Debug, Clone)]
pub struct Group {
    pub source: Option<IpAddr>,
    pub group: IpAddr,
    pub port: u16,
    pub stats: GroupCounters,
    pub activity: Ring<Activity>,
    pub rate: RateSampler,
    /// Set when something was recorded since the last tick.
    busy: bool,
}

impl Group {
    pub fn new(source: Option<IpAddr>, group: IpAddr, port: u16, history: usize) -> Self {
        Group {
            source,
            group,
            port,
            stats: GroupCounters::default(),
            activity: Ring::new(history),
            rate: RateSampler::new(Instant::now()),
            busy: false,
        }
    }

    pub fn family(&self) -> Family {
        Family::of(&self.group)
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.group, self.port)
    }

    /// `SOURCE,GROUP`, with `*` for any-source groups.
    pub fn label(&self) -> String {
        match self.source {
            Some(source) => format!("{},{}", source, self.group),
            None => format!("*,{}", self.group),
        }
    }

    /// Accounts one packet, sent or received, under `activity`.
    pub fn record(&mut self, activity: Activity, bytes: usize) {
        let stats = &mut self.stats;
        stats.count += 1;
        stats.bytes_total += bytes as u64;
        match activity {
            Activity::Gap => stats.gaps += 1,
            Activity::Duplicate => stats.dupes += 1,
            Activity::Reorder => stats.order += 1,
            Activity::Delayed => stats.delayed += 1,
            Activity::Invalid => stats.invalid += 1,
            Activity::InOrder | Activity::Idle | Activity::Error => {}
        }
        self.activity.push(activity);
        self.busy = true;
    }

    /// A transmit failure: not a packet, but shown and counted as an error.
    pub fn record_error(&mut self) {
        self.stats.gaps += 1;
        self.activity.push(Activity::Error);
        self.busy = true;
    }

    /// Closes the current tick, plotting an idle cell if nothing happened.
    /// Returns whether the tick saw any activity.
    pub fn end_tick(&mut self) -> bool {
        let busy = std::mem::take(&mut self.busy);
        if !busy {
            self.activity.push(Activity::Idle);
        }
        busy
    }

    pub fn sample_rate(&mut self, now: Instant) -> f64 {
        self.rate.sample(now, self.stats.bytes_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_means_default_group() {
        let groups = expand_groups(&[], 1234, 16).expect("default group");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].label(), "*,225.1.2.3");
        assert_eq!(groups[0].destination().to_string(), "225.1.2.3:1234");
    }

    #[test]
    fn ipv4_range_expands_whole_address() {
        let groups = expand_groups(&args(&["225.1.2.254+3"]), 1234, 16).expect("range");
        let labels: Vec<_> = groups.iter().map(Group::label).collect();
        assert_eq!(labels, vec!["*,225.1.2.254", "*,225.1.2.255", "*,225.1.3.0"]);
    }

    #[test]
    fn ipv6_range_steps_low_bits() {
        let groups = expand_groups(&args(&["ff2e::ffff:ffff+2"]), 1234, 16).expect("range");
        assert_eq!(groups[0].group.to_string(), "ff2e::ffff:ffff");
        assert_eq!(groups[1].group.to_string(), "ff2e::");
        assert!(groups.iter().all(|g| g.family() == Family::V6));
    }

    #[test]
    fn source_is_shared_by_expanded_groups() {
        let groups = expand_groups(&args(&["10.0.0.1,232.1.1.1+2"]), 4321, 16).expect("ssm");
        assert_eq!(groups[0].label(), "10.0.0.1,232.1.1.1");
        assert_eq!(groups[1].label(), "10.0.0.1,232.1.1.2");
        assert_eq!(groups[1].port, 4321);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert_eq!(
            "10.0.0.1".parse::<GroupArg>(),
            Err(ConfigError::InvalidAddress("10.0.0.1".into()))
        );
        assert_eq!(
            "foo".parse::<GroupArg>(),
            Err(ConfigError::InvalidAddress("foo".into()))
        );
        assert_eq!(
            "225.1.2.3+0".parse::<GroupArg>(),
            Err(ConfigError::InvalidRange("225.1.2.3+0".into()))
        );
        assert!(matches!(
            "fe80::1,225.1.2.3".parse::<GroupArg>(),
            Err(ConfigError::FamilyMismatch { .. })
        ));
    }

    #[test]
    fn too_many_groups_is_rejected() {
        let err = expand_groups(&args(&["225.0.0.1+2000", "225.8.0.1+49"]), 1234, 16)
            .expect_err("over the limit");
        assert_eq!(err, ConfigError::TooManyGroups { max: MAX_GROUPS });
        assert!(expand_groups(&args(&["225.0.0.1+2048"]), 1234, 16).is_ok());
    }

    #[test]
    fn huge_ranges_do_not_overflow_the_total() {
        let huge = args(&["225.1.2.3+18446744073709551615", "225.1.2.3+1"]);
        let err = expand_groups(&huge, 1234, 16).expect_err("overflowing total");
        assert_eq!(err, ConfigError::TooManyGroups { max: MAX_GROUPS });
    }

    #[test]
    fn families_in_first_use_order() {
        let groups = expand_groups(&args(&["ff2e::1", "225.1.2.3+2", "ff2e::9"]), 1234, 16)
            .expect("mixed families");
        assert_eq!(families(&groups), vec![Family::V6, Family::V4]);
    }

    #[test]
    fn record_bumps_matching_counter() {
        let mut group = Group::new(None, "225.1.2.3".parse().unwrap(), 1234, 4);
        group.record(Activity::InOrder, 100);
        group.record(Activity::Duplicate, 100);
        group.record(Activity::Invalid, 10);
        group.record_error();

        assert_eq!(group.stats.count, 3);
        assert_eq!(group.stats.dupes, 1);
        assert_eq!(group.stats.invalid, 1);
        assert_eq!(group.stats.gaps, 1);
        assert_eq!(group.stats.bytes_total, 210);
        let plot: String = group.activity.iter().map(Activity::symbol).collect();
        assert_eq!(plot, ".DIE");
    }

    #[test]
    fn quiet_tick_plots_idle_cell() {
        let mut group = Group::new(None, "225.1.2.3".parse().unwrap(), 1234, 8);
        assert!(!group.end_tick());
        group.record(Activity::InOrder, 1);
        assert!(group.end_tick());
        assert!(!group.end_tick());
        let plot: String = group.activity.iter().map(Activity::symbol).collect();
        assert_eq!(plot, " . ");
    }
}
