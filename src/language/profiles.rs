use super::{CacheLocation, Language, LanguageProfile};
use crate::report::TextDialect;

const NODE_PREFIX: &str = "ulimit -n 65535;";

const GRADLE_OPTS: &str = "-Xmx3g -Xms512m -XX:MaxMetaspaceSize=1g -Dorg.gradle.daemon=false \
-Dorg.gradle.parallel=true -Dorg.gradle.caching=true -Dorg.gradle.configureondemand=true";

const SHM_2G: i64 = 2 * 1024 * 1024 * 1024;

const PIP_CACHE: CacheLocation = CacheLocation {
    name: "pip",
    mount_point: "/root/.cache/pip",
    user_dir: ".cache/pip",
};

const NPM_CACHE: CacheLocation = CacheLocation {
    name: "npm",
    mount_point: "/root/.npm",
    user_dir: ".npm",
};

static PYTHON: LanguageProfile = LanguageProfile {
    language: Language::Python,
    default_image: "python:3.11",
    default_build_command: "pip install -e .[test]; pip install pytest pytest-json-report",
    default_test_command: "pytest --json-report --json-report-file=report_pytest.json",
    caches: &[PIP_CACHE],
    report_globs: &["report_pytest.json", "test-results/*.xml", "test-results/*.json"],
    fallback_report_globs: &["**/junit*.xml", "**/pytest*.xml"],
    text_dialects: &[TextDialect::Pytest, TextDialect::Unittest],
    command_prefix: None,
    env: &[("PIP_DISABLE_PIP_VERSION_CHECK", "1")],
    shm_size: None,
};

static JAVA: LanguageProfile = LanguageProfile {
    language: Language::Java,
    default_image: "maven:3.9-eclipse-temurin-17",
    default_build_command: "mvn -B -q -DskipTests install",
    default_test_command: "mvn -B test",
    caches: &[CacheLocation {
        name: "maven",
        mount_point: "/root/.m2",
        user_dir: ".m2",
    }],
    report_globs: &[
        "**/target/surefire-reports/TEST-*.xml",
        "**/build/test-results/**/*.xml",
        "test-results/*.xml",
    ],
    fallback_report_globs: &["**/target/failsafe-reports/TEST-*.xml"],
    text_dialects: &[TextDialect::Maven, TextDialect::Gradle],
    command_prefix: None,
    env: &[],
    shm_size: None,
};

static KOTLIN: LanguageProfile = LanguageProfile {
    language: Language::Kotlin,
    default_image: "gradle:8.5-jdk17",
    default_build_command: "./gradlew build -x test --no-daemon",
    default_test_command: "./gradlew test --no-daemon",
    caches: &[
        CacheLocation {
            name: "gradle",
            mount_point: "/root/.gradle",
            user_dir: ".gradle",
        },
        CacheLocation {
            name: "kotlin",
            mount_point: "/root/.kotlin",
            user_dir: ".kotlin",
        },
    ],
    report_globs: &["**/build/test-results/**/*.xml", "test-results/*.xml"],
    fallback_report_globs: &["**/test-results/**/*.xml", "**/test/**/TEST-*.xml"],
    text_dialects: &[TextDialect::Gradle],
    command_prefix: None,
    env: &[("GRADLE_OPTS", GRADLE_OPTS)],
    shm_size: Some(SHM_2G),
};

static SCALA: LanguageProfile = LanguageProfile {
    language: Language::Scala,
    default_image: "hseeberger/scala-sbt:11.0.12_1.5.5_2.13.6",
    default_build_command: "sbt compile",
    default_test_command: "sbt test",
    caches: &[CacheLocation {
        name: "sbt",
        mount_point: "/root/.sbt",
        user_dir: ".sbt",
    }],
    report_globs: &["**/target/test-reports/*.xml", "test-results/*.xml"],
    fallback_report_globs: &[],
    text_dialects: &[TextDialect::Sbt],
    command_prefix: None,
    env: &[],
    shm_size: None,
};

static GO: LanguageProfile = LanguageProfile {
    language: Language::Go,
    default_image: "golang:latest",
    default_build_command: "go mod download && go build ./...",
    default_test_command: "go test -json ./... | tee gotest_results.jsonl",
    caches: &[
        CacheLocation {
            name: "go-mod",
            mount_point: "/go/pkg/mod",
            user_dir: "go/pkg/mod",
        },
        CacheLocation {
            name: "go-build",
            mount_point: "/root/.cache/go-build",
            user_dir: ".cache/go-build",
        },
    ],
    report_globs: &["gotest_results.jsonl", "test-results/*.xml", "test-results/*.json"],
    fallback_report_globs: &[],
    text_dialects: &[TextDialect::GoTest],
    command_prefix: None,
    env: &[],
    shm_size: None,
};

static RUST: LanguageProfile = LanguageProfile {
    language: Language::Rust,
    default_image: "rust:latest",
    default_build_command: "cargo build --tests",
    default_test_command: "cargo test 2>&1 | tee test_results.txt",
    caches: &[
        CacheLocation {
            name: "cargo-registry",
            mount_point: "/usr/local/cargo/registry",
            user_dir: ".cargo/registry",
        },
        CacheLocation {
            name: "cargo-git",
            mount_point: "/usr/local/cargo/git",
            user_dir: ".cargo/git",
        },
    ],
    report_globs: &["test_results.txt", "test-results/*.xml", "test-results/*.json"],
    fallback_report_globs: &[],
    text_dialects: &[TextDialect::Cargo],
    command_prefix: None,
    env: &[],
    shm_size: None,
};

static JAVASCRIPT: LanguageProfile = LanguageProfile {
    language: Language::Javascript,
    default_image: "node:22",
    default_build_command: "npm install --legacy-peer-deps --loglevel=error; \
npm install mocha-junit-reporter --legacy-peer-deps --loglevel=error",
    default_test_command: "npm test -- --reporter mocha-junit-reporter",
    caches: &[
        NPM_CACHE,
        CacheLocation {
            name: "javascript",
            mount_point: "/root/.cache/javascript",
            user_dir: ".cache/javascript",
        },
    ],
    report_globs: &["test-results.xml", "test-results/*.xml", "test-results/*.json"],
    fallback_report_globs: &["jest_results.json", "**/junit*.xml"],
    text_dialects: &[TextDialect::Mocha, TextDialect::Jest],
    command_prefix: Some(NODE_PREFIX),
    env: &[],
    shm_size: None,
};

static TYPESCRIPT: LanguageProfile = LanguageProfile {
    language: Language::Typescript,
    default_image: "node:latest",
    default_build_command: "yarn install",
    default_test_command: "npx jest --json --outputFile=jest_results.json",
    caches: &[CacheLocation {
        name: "yarn",
        mount_point: "/usr/local/share/.cache/yarn",
        user_dir: ".cache/yarn",
    }],
    report_globs: &["jest_results.json", "test-results/*.xml", "test-results/*.json"],
    fallback_report_globs: &["test-results.xml", "**/junit*.xml"],
    text_dialects: &[TextDialect::Jest, TextDialect::Mocha],
    command_prefix: Some(NODE_PREFIX),
    env: &[],
    shm_size: None,
};

static NODEJS: LanguageProfile = LanguageProfile {
    language: Language::Nodejs,
    default_image: "node:18",
    default_build_command: "npm install",
    default_test_command: "npm test 2>&1 | tee test_results.txt",
    caches: &[NPM_CACHE],
    report_globs: &["test_results.txt", "test-results/*.xml", "test-results/*.json"],
    fallback_report_globs: &["test-results.xml", "jest_results.json"],
    text_dialects: &[TextDialect::Jest, TextDialect::Mocha],
    command_prefix: Some(NODE_PREFIX),
    env: &[],
    shm_size: None,
};

static PHP: LanguageProfile = LanguageProfile {
    language: Language::Php,
    default_image: "composer:latest",
    default_build_command: "composer install --no-interaction --prefer-dist",
    default_test_command: "vendor/bin/phpunit --log-junit test-results/junit.xml",
    caches: &[CacheLocation {
        name: "composer",
        mount_point: "/tmp/composer",
        user_dir: ".cache/composer",
    }],
    report_globs: &["test-results/*.xml", "test-results/*.json"],
    fallback_report_globs: &["**/junit*.xml"],
    text_dialects: &[TextDialect::PhpUnit],
    command_prefix: None,
    env: &[("COMPOSER_HOME", "/tmp/composer")],
    shm_size: None,
};

static RUBY: LanguageProfile = LanguageProfile {
    language: Language::Ruby,
    default_image: "ruby:latest",
    default_build_command: "bundle install",
    default_test_command: "bundle exec rspec --format progress --format json --out rspec_results.json",
    caches: &[CacheLocation {
        name: "gem",
        mount_point: "/usr/local/bundle",
        user_dir: ".gem",
    }],
    report_globs: &["rspec_results.json", "test-results/*.xml", "test-results/*.json"],
    fallback_report_globs: &["**/rspec*.xml"],
    text_dialects: &[TextDialect::Rspec],
    command_prefix: None,
    env: &[],
    shm_size: None,
};

static CPP: LanguageProfile = LanguageProfile {
    language: Language::Cpp,
    default_image: "rikorose/gcc-cmake:latest",
    default_build_command: "mkdir -p build && cd build && cmake .. && make -j$(nproc)",
    default_test_command: "cd build && ctest -V",
    caches: &[
        CacheLocation {
            name: "cmake",
            mount_point: "/root/.cmake",
            user_dir: ".cmake",
        },
        CacheLocation {
            name: "cpp",
            mount_point: "/root/.cache/cpp",
            user_dir: ".cache/cpp",
        },
    ],
    report_globs: &["test-results/*.xml", "test-results/*.json"],
    fallback_report_globs: &["**/Testing/*/Test.xml"],
    text_dialects: &[TextDialect::Ctest],
    command_prefix: None,
    env: &[],
    shm_size: None,
};

/// Profile of `language`.
pub fn profile_for(language: Language) -> &'static LanguageProfile {
    match language {
        Language::Python => &PYTHON,
        Language::Java => &JAVA,
        Language::Kotlin => &KOTLIN,
        Language::Scala => &SCALA,
        Language::Go => &GO,
        Language::Rust => &RUST,
        Language::Javascript => &JAVASCRIPT,
        Language::Typescript => &TYPESCRIPT,
        Language::Nodejs => &NODEJS,
        Language::Php => &PHP,
        Language::Ruby => &RUBY,
        Language::Cpp => &CPP,
    }
}
