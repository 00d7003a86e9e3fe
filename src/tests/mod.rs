// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod cel;
mod factory;
mod guards;
mod lexer;
mod marker;
