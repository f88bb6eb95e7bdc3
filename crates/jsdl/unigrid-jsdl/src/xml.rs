//! JSDL XML rendering.

use std::fmt::Write;

use crate::document::{
    ApplicationVariant, CommandLine, DataStaging, JobDefinition, JobIdentification, RangeRequirement, Resources,
};

pub const JSDL_NS: &str = "http://schemas.ggf.org/jsdl/2005/11/jsdl";
pub const POSIX_NS: &str = "http://schemas.ggf.org/jsdl/2005/11/jsdl-posix";
pub const HPCPA_NS: &str = "http://schemas.ggf.org/jsdl/2006/07/jsdl-hpcpa";
pub const SPMD_NS: &str = "http://schemas.ogf.org/jsdl/2007/02/jsdl-spmd";
pub const UNICORE_NS: &str = "http://www.unicore.eu/unicore/jsdl-extensions";

struct XmlWriter {
    out: String,
    depth: usize,
}

impl XmlWriter {
    fn new() -> Self {
        Self {
            out: String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"),
            depth: 0,
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.indent();
        self.out.push('<');
        self.out.push_str(name);
        for (key, value) in attrs {
            let _ = write!(self.out, " {}=\"{}\"", key, escape(value));
        }
        self.out.push_str(">\n");
        self.depth += 1;
    }

    fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        let _ = writeln!(self.out, "</{}>", name);
    }

    fn text(&mut self, name: &str, attrs: &[(&str, &str)], value: &str) {
        self.indent();
        self.out.push('<');
        self.out.push_str(name);
        for (key, value) in attrs {
            let _ = write!(self.out, " {}=\"{}\"", key, escape(value));
        }
        let _ = writeln!(self.out, ">{}</{}>", escape(value), name);
    }

    fn optional(&mut self, name: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.text(name, &[], value);
        }
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl JobDefinition {
    /// Render the document as JSDL XML
    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::new();
        w.open(
            "jsdl:JobDefinition",
            &[
                ("xmlns:jsdl", JSDL_NS),
                ("xmlns:jsdl-posix", POSIX_NS),
                ("xmlns:jsdl-hpcpa", HPCPA_NS),
                ("xmlns:jsdl-spmd", SPMD_NS),
                ("xmlns:jsdl-u", UNICORE_NS),
            ],
        );
        w.open("jsdl:JobDescription", &[]);

        let description = &self.description;
        if let Some(ident) = &description.identification {
            write_identification(&mut w, ident);
        }
        if let Some(app) = &description.application {
            w.open("jsdl:Application", &[]);
            w.optional("jsdl:ApplicationName", app.name.as_deref());
            w.optional("jsdl:ApplicationVersion", app.version.as_deref());
            w.optional("jsdl:Description", app.description.as_deref());
            if let Some(variant) = &app.variant {
                write_variant(&mut w, variant);
            }
            w.close("jsdl:Application");
        }
        if let Some(resources) = &description.resources {
            write_resources(&mut w, resources);
        }
        for staging in &description.data_staging {
            write_staging(&mut w, staging);
        }

        w.close("jsdl:JobDescription");
        w.close("jsdl:JobDefinition");
        w.out
    }
}

fn write_identification(w: &mut XmlWriter, ident: &JobIdentification) {
    w.open("jsdl:JobIdentification", &[]);
    w.optional("jsdl:JobName", ident.job_name.as_deref());
    w.optional("jsdl:Description", ident.description.as_deref());
    for project in &ident.projects {
        w.text("jsdl:JobProject", &[], project);
    }
    w.close("jsdl:JobIdentification");
}

fn write_variant(w: &mut XmlWriter, variant: &ApplicationVariant) {
    match variant {
        ApplicationVariant::Posix(cmd) => {
            w.open("jsdl-posix:POSIXApplication", &[]);
            write_command(w, "jsdl-posix", cmd);
            w.close("jsdl-posix:POSIXApplication");
        }
        ApplicationVariant::HpcProfile(cmd) => {
            w.open("jsdl-hpcpa:HPCProfileApplication", &[]);
            write_command(w, "jsdl-hpcpa", cmd);
            w.close("jsdl-hpcpa:HPCProfileApplication");
        }
        ApplicationVariant::Spmd(spmd) => {
            w.open("jsdl-spmd:SPMDApplication", &[]);
            write_command(w, "jsdl-posix", &spmd.command);
            if let Some(n) = spmd.number_of_processes {
                w.text("jsdl-spmd:NumberOfProcesses", &[], &n.to_string());
            }
            if let Some(n) = spmd.processes_per_host {
                w.text("jsdl-spmd:ProcessesPerHost", &[], &n.to_string());
            }
            if let Some(n) = spmd.threads_per_host {
                w.text("jsdl-spmd:ThreadsPerHost", &[], &n.to_string());
            }
            if let Some(variation) = spmd.variation {
                w.text("jsdl-spmd:SPMDVariation", &[], variation.uri());
            }
            w.close("jsdl-spmd:SPMDApplication");
        }
    }
}

fn write_command(w: &mut XmlWriter, prefix: &str, cmd: &CommandLine) {
    let tag = |name: &str| format!("{prefix}:{name}");
    w.optional(&tag("Executable"), cmd.executable.as_deref());
    for argument in &cmd.arguments {
        w.text(&tag("Argument"), &[], argument);
    }
    w.optional(&tag("Input"), cmd.input.as_deref());
    w.optional(&tag("Output"), cmd.output.as_deref());
    w.optional(&tag("Error"), cmd.error.as_deref());
    w.optional(&tag("WorkingDirectory"), cmd.working_directory.as_deref());
    for env in &cmd.environment {
        w.text(&tag("Environment"), &[("name", &env.name)], &env.value);
    }
}

fn write_resources(w: &mut XmlWriter, resources: &Resources) {
    w.open("jsdl:Resources", &[]);
    if !resources.candidate_hosts.is_empty() {
        w.open("jsdl:CandidateHosts", &[]);
        for host in &resources.candidate_hosts {
            w.text("jsdl:HostName", &[], host);
        }
        w.close("jsdl:CandidateHosts");
    }
    if let Some(os) = &resources.operating_system {
        w.open("jsdl:OperatingSystem", &[]);
        w.open("jsdl:OperatingSystemType", &[]);
        w.text("jsdl:OperatingSystemName", &[], os);
        w.close("jsdl:OperatingSystemType");
        w.close("jsdl:OperatingSystem");
    }
    if let Some(arch) = &resources.cpu_architecture {
        w.open("jsdl:CPUArchitecture", &[]);
        w.text("jsdl:CPUArchitectureName", &[], arch);
        w.close("jsdl:CPUArchitecture");
    }

    let ranges = [
        ("jsdl:IndividualCPUSpeed", &resources.individual_cpu_speed),
        ("jsdl:IndividualCPUTime", &resources.individual_cpu_time),
        ("jsdl:IndividualCPUCount", &resources.individual_cpu_count),
        ("jsdl:IndividualPhysicalMemory", &resources.individual_physical_memory),
        ("jsdl:IndividualDiskSpace", &resources.individual_disk_space),
        ("jsdl:TotalCPUCount", &resources.total_cpu_count),
        ("jsdl:TotalResourceCount", &resources.total_resource_count),
    ];
    for (name, range) in ranges {
        if let Some(range) = range {
            write_range(w, name, range);
        }
    }

    for request in &resources.named_resources {
        w.open("jsdl-u:ResourceRequest", &[]);
        w.text("jsdl-u:Name", &[], &request.name);
        w.text("jsdl-u:Value", &[], &request.value);
        w.close("jsdl-u:ResourceRequest");
    }
    w.close("jsdl:Resources");
}

fn write_range(w: &mut XmlWriter, name: &str, range: &RangeRequirement) {
    w.open(name, &[]);
    match range {
        RangeRequirement::Exact { value, epsilon } => match epsilon {
            Some(eps) => w.text("jsdl:Exact", &[("epsilon", &eps.to_string())], &value.to_string()),
            None => w.text("jsdl:Exact", &[], &value.to_string()),
        },
        RangeRequirement::Ranged { lower, upper } => {
            if let Some(bound) = lower {
                let exclusive = bound.exclusive.to_string();
                w.text("jsdl:LowerBoundedRange", &[("exclusiveBound", &exclusive)], &bound.value.to_string());
            }
            if let Some(bound) = upper {
                let exclusive = bound.exclusive.to_string();
                w.text("jsdl:UpperBoundedRange", &[("exclusiveBound", &exclusive)], &bound.value.to_string());
            }
        }
    }
    w.close(name);
}

fn write_staging(w: &mut XmlWriter, staging: &DataStaging) {
    w.open("jsdl:DataStaging", &[]);
    w.text("jsdl:FileName", &[], &staging.file_name);
    w.optional("jsdl:FilesystemName", staging.filesystem_name.as_deref());
    w.text("jsdl:CreationFlag", &[], staging.creation_flag.as_str());
    w.text("jsdl:DeleteOnTermination", &[], &staging.delete_on_termination.to_string());
    if let Some(source) = &staging.source {
        w.open("jsdl:Source", &[]);
        w.text("jsdl:URI", &[], source);
        w.close("jsdl:Source");
    }
    if let Some(target) = &staging.target {
        w.open("jsdl:Target", &[]);
        w.text("jsdl:URI", &[], target);
        w.close("jsdl:Target");
    }
    w.close("jsdl:DataStaging");
}
