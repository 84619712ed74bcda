// SPDX-License-Identifier: MPL-2.0

//! The module to parse kernel command-line arguments.
//!
//! The format of the command line string conforms to the Linux kernel command
//! line rules:
//!
//! <https://www.kernel.org/doc/html/v6.4/admin-guide/kernel-parameters.html>
//!
//! Only module arguments (`module.option` and `module.option=value`) are
//! interpreted. Plain options and everything after `--` are kept verbatim.

use std::collections::BTreeMap;

/// Kernel module arguments
#[derive(PartialEq, Debug, Clone)]
pub enum ModuleArg {
    /// A string argument
    Arg(String),
    /// A key-value argument
    KeyVal(String, String),
}

/// The struct to store the parsed kernel command-line arguments.
#[derive(Debug, Default)]
pub struct KCmdlineArg {
    module_args: BTreeMap<String, Vec<ModuleArg>>,
    other_args: Vec<String>,
}

// Define get APIs.
impl KCmdlineArg {
    /// Gets the argument vector of a kernel module.
    pub fn get_module_args(&self, module: &str) -> Option<&Vec<ModuleArg>> {
        self.module_args.get(module)
    }

    /// Gets the value of the `module.key=value` argument, if present.
    ///
    /// If the key is given more than once, the last one wins.
    pub fn get_module_value(&self, module: &str, key: &str) -> Option<&str> {
        self.get_module_args(module)?
            .iter()
            .rev()
            .find_map(|arg| match arg {
                ModuleArg::KeyVal(name, value) if name == key => Some(value.as_str()),
                _ => None,
            })
    }

    /// Gets the arguments that are not module arguments.
    pub fn other_args(&self) -> &[String] {
        &self.other_args
    }
}

// Splits the command line string by spaces but preserve
// ones that are protected by double quotes(`"`).
fn split_arg(input: &str) -> impl Iterator<Item = &str> {
    let mut inside_quotes = false;

    input
        .split(move |c: char| {
            if c == '"' {
                inside_quotes = !inside_quotes;
            }

            !inside_quotes && c.is_whitespace()
        })
        .filter(|arg| !arg.is_empty())
}

// Define the way to parse a string to `KCmdlineArg`.
impl From<&str> for KCmdlineArg {
    fn from(cmdline: &str) -> Self {
        let mut result = KCmdlineArg::default();

        // Every thing after the "--" mark is left to the init process.
        let mut kcmdline_end = false;

        for arg in split_arg(cmdline) {
            // Cmdline => KernelArg "--" InitArg
            // KernelArg => Arg "\s+" KernelArg | %empty
            // InitArg => Arg "\s+" InitArg | %empty
            if kcmdline_end {
                result.other_args.push(arg.to_string());
                continue;
            }
            if arg == "--" {
                kcmdline_end = true;
                continue;
            }
            // Arg => Entry | Entry "=" Value
            let (entry, value) = match arg.split_once('=') {
                Some((entry, value)) if !value.contains('=') => {
                    (entry, Some(value.trim_matches('"')))
                }
                Some(_) => {
                    log::warn!(
                        "[KCmdline] Unable to parse kernel argument {}, skip for now",
                        arg
                    );
                    continue;
                }
                None => (arg, None),
            };
            // Entry => Module "." ModuleOptionName | KernelOptionName
            let entry_pattern: Vec<_> = entry.split('.').collect();
            let (modname, option) = match entry_pattern.as_slice() {
                [_] => {
                    result.other_args.push(arg.to_string());
                    continue;
                }
                [modname, option] => (*modname, *option),
                _ => {
                    log::warn!(
                        "[KCmdline] Unable to parse entry {} in argument {}, skip for now",
                        entry,
                        arg
                    );
                    continue;
                }
            };
            let modarg = match value {
                Some(value) => ModuleArg::KeyVal(option.to_string(), value.to_string()),
                None => ModuleArg::Arg(option.to_string()),
            };
            result
                .module_args
                .entry(modname.to_string())
                .or_default()
                .push(modarg);
        }

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn module_args() {
        let cmdline = KCmdlineArg::from("asid.bits=4 asid.verbose console=ttyS0 asid.reserved=2");

        assert_eq!(
            cmdline.get_module_args("asid").unwrap(),
            &vec![
                ModuleArg::KeyVal("bits".to_string(), "4".to_string()),
                ModuleArg::Arg("verbose".to_string()),
                ModuleArg::KeyVal("reserved".to_string(), "2".to_string()),
            ]
        );
        assert_eq!(cmdline.get_module_value("asid", "bits"), Some("4"));
        assert_eq!(cmdline.get_module_value("asid", "verbose"), None);
        assert_eq!(cmdline.other_args(), ["console=ttyS0"]);
        assert!(cmdline.get_module_args("ostd").is_none());
    }

    #[test]
    fn last_value_wins() {
        let cmdline = KCmdlineArg::from("asid.log_level=info asid.log_level=trace");
        assert_eq!(cmdline.get_module_value("asid", "log_level"), Some("trace"));
    }

    #[test]
    fn quotes_and_separator() {
        let cmdline = KCmdlineArg::from("  asid.log_level=\"debug\"   -- init.bits=3 quiet ");

        assert_eq!(cmdline.get_module_value("asid", "log_level"), Some("debug"));
        assert!(cmdline.get_module_args("init").is_none());
        assert_eq!(cmdline.other_args(), ["init.bits=3", "quiet"]);
    }

    #[test]
    fn malformed_args_are_skipped() {
        let cmdline = KCmdlineArg::from("a=b=c x.y.z=1 asid.bits=5");

        assert_eq!(
            cmdline.get_module_args("asid").unwrap(),
            &vec![ModuleArg::KeyVal("bits".to_string(), "5".to_string())]
        );
        assert!(cmdline.other_args().is_empty());
    }
}
